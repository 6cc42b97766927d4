//! Kernel filesystem surfaces
//!
//! All sysfs and procfs paths x3dctl touches are derived from a [`Host`]
//! root. The shipped binary always uses `/`; tests root a `Host` in a
//! temporary directory holding a synthetic tree.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Per-CPU topology directory, relative to the host root
pub const CPU_BASE: &str = "sys/devices/system/cpu";

/// Platform driver directory of `amd_x3d_vcache`, relative to the host root
pub const VCACHE_DRIVER_BASE: &str = "sys/bus/platform/drivers/amd_x3d_vcache";

/// Live interrupt table, relative to the host root
pub const INTERRUPTS: &str = "proc/interrupts";

/// Per-IRQ directories, relative to the host root
pub const IRQ_BASE: &str = "proc/irq";

/// CPU identification, relative to the host root
pub const CPUINFO: &str = "proc/cpuinfo";

/// Process directories, relative to the host root
pub const PROC_BASE: &str = "proc";

/// Root of the kernel filesystems x3dctl reads and writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    root: PathBuf,
}

impl Host {
    /// The running system
    pub fn system() -> Self {
        Self::rooted("/")
    }

    /// A tree mounted somewhere other than `/`
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/sys/devices/system/cpu`
    pub fn cpu_dir(&self) -> PathBuf {
        self.root.join(CPU_BASE)
    }

    /// Last-level (index 3) cache size of one CPU
    pub fn l3_size(&self, cpu: usize) -> PathBuf {
        self.cpu_dir()
            .join(format!("cpu{}", cpu))
            .join("cache/index3/size")
    }

    /// `/proc/interrupts`
    pub fn interrupts(&self) -> PathBuf {
        self.root.join(INTERRUPTS)
    }

    /// `/proc/irq/<irq>/smp_affinity`
    pub fn irq_affinity(&self, irq: u32) -> PathBuf {
        self.root
            .join(IRQ_BASE)
            .join(irq.to_string())
            .join("smp_affinity")
    }

    /// `/proc/cpuinfo`
    pub fn cpuinfo(&self) -> PathBuf {
        self.root.join(CPUINFO)
    }

    /// `/proc`
    pub fn proc_dir(&self) -> PathBuf {
        self.root.join(PROC_BASE)
    }

    /// `/sys/bus/platform/drivers/amd_x3d_vcache`
    pub fn vcache_driver_dir(&self) -> PathBuf {
        self.root.join(VCACHE_DRIVER_BASE)
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::system()
    }
}

/// Read a whole kernel file
pub fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Overwrite a kernel attribute with `value`
pub fn write(path: &Path, value: &str) -> Result<()> {
    fs::write(path, value).map_err(|e| Error::io(path, e))
}

/// Names of the entries of a directory, in directory order
///
/// Entries whose names are not valid UTF-8 are skipped.
pub fn list_dir(path: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(path).map_err(|e| Error::io(path, e))?;
    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect())
}

/// Leading unsigned decimal digits of `text`, after leading whitespace
///
/// Kernel attributes carry suffixes (`"98304K"`) and trailing newlines;
/// only the numeric prefix is meaningful.
pub fn parse_leading_u64(text: &str) -> Option<u64> {
    let text = text.trim_start();
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}
