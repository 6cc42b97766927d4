//! Utility functions and data structures
//!
//! This module contains the CPU set bitmap and mask codec, the kernel
//! filesystem accessors and logging setup used throughout x3dctl.

pub mod bitmap;
pub mod log;
pub mod sysfs;

#[cfg(test)]
pub mod testing;

// Re-export commonly used utilities
pub use self::bitmap::CpuSet;
pub use self::sysfs::Host;
