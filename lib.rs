//! x3dctl - control surface for AMD 3D V-Cache dual-CCD processors
//!
//! This is the main library for x3dctl. It switches the `amd_x3d_vcache`
//! platform driver between its cache and frequency modes, derives which
//! logical CPUs sit on the V-Cache CCD and which on the frequency CCD,
//! and steers GPU interrupt affinity and per-process scheduling to match.
//!
//! Every kernel surface is reached through a [`utils::sysfs::Host`], so the
//! whole engine can be driven against a synthetic `/sys` + `/proc` tree.

// Core modules
pub mod utils;
pub mod config;

// Host CPU identification
pub mod arch;

// Topology, interrupt steering and process tuning
pub mod core;

// Platform drivers
pub mod drivers;

use std::io;
use std::path::PathBuf;

// Re-export the boundary surface
pub use crate::core::irq::affinity::{steer, MaskKind, SteerOutcome, SteerPolicy, SteerReport};
pub use crate::core::irq::audit::{audit, AuditReport, SteeringState};
pub use crate::core::topology::{CcdClass, TopologyContext, TopologySnapshot};
pub use crate::utils::bitmap::{encode_mask, CpuSet};
pub use crate::utils::sysfs::Host;

/// x3dctl version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common error type for x3dctl
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Topology scan left one or both CCD classes empty
    #[error(
        "topology detection failed: found {cache} cache-CCD and {frequency} frequency-CCD CPUs"
    )]
    DetectionFailed {
        /// CPUs classified as cache
        cache: usize,
        /// CPUs classified as frequency
        frequency: usize,
    },
    /// A kernel file or directory could not be opened, read or written
    #[error("cannot access {}: {source}", path.display())]
    IoUnavailable {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// The amd_x3d_vcache driver is not bound to any device
    #[error("X3D driver not found")]
    DriverNotFound,
    /// Cache-CCD pinning was requested without the explicit opt-in
    #[error("refusing to pin GPU interrupts to the cache CCD without --allow-cache-ccd")]
    CacheTargetRefused,
    /// Process id is not a positive integer
    #[error("invalid PID: {0}")]
    InvalidPid(String),
    /// A textual value could not be parsed
    #[error("invalid {what}: {value:?}")]
    InvalidValue {
        /// What was being parsed
        what: &'static str,
        /// Offending text
        value: String,
    },
    /// Profile configuration is malformed
    #[error("config line {line}: {reason}")]
    Config {
        /// 1-based line number
        line: usize,
        /// What is wrong with it
        reason: String,
    },
    /// Profile configuration is not root-owned or is group/other writable
    #[error("refusing insecure config {}: must be owned by root and not group/other writable", .0.display())]
    InsecureConfig(PathBuf),
    /// No profile with that name
    #[error("unknown profile: {0}")]
    UnknownProfile(String),
    /// A scheduling syscall failed
    #[error("{call} failed: {source}")]
    Syscall {
        /// Syscall name
        call: &'static str,
        /// OS error
        #[source]
        source: io::Error,
    },
    /// Operation is only available on Linux
    #[error("operation not supported on this platform")]
    NotSupported,
}

impl Error {
    /// Wrap an I/O failure on `path`
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::IoUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Capture `errno` for a failed syscall
    pub fn last_os_error(call: &'static str) -> Self {
        Error::Syscall {
            call,
            source: io::Error::last_os_error(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
