//! Platform drivers
//!
//! x3dctl controls one kernel driver: `amd_x3d_vcache`, which exposes the
//! preferred-CCD mode of X3D parts as a sysfs attribute on its platform
//! device.

pub mod platform;

pub use platform::{VcacheDevice, X3dMode};
