//! Core engine
//!
//! This module contains the CCD topology detector, GPU interrupt
//! scanning, steering and auditing, and per-process scheduling control.

pub mod irq;
pub mod sched;
pub mod topology;
