//! `amd_x3d_vcache` platform device
//!
//! The driver binds to an ACPI device named `AMDI*` and exposes
//! `amd_x3d_mode`, which reads back and accepts `cache` or `frequency`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::utils::sysfs::{self, Host};
use crate::{Error, Result};

/// ACPI name prefix of the V-Cache device
pub const ACPI_PREFIX: &str = "AMDI";

/// Mode attribute exposed by the driver
pub const MODE_ATTR: &str = "amd_x3d_mode";

/// Operating mode of the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X3dMode {
    /// Prefer the V-Cache CCD
    Cache,
    /// Prefer the frequency CCD
    Frequency,
}

impl X3dMode {
    /// Text written to and read from the mode attribute
    pub fn as_str(self) -> &'static str {
        match self {
            X3dMode::Cache => "cache",
            X3dMode::Frequency => "frequency",
        }
    }
}

impl fmt::Display for X3dMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for X3dMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "cache" => Ok(X3dMode::Cache),
            "frequency" => Ok(X3dMode::Frequency),
            other => Err(Error::InvalidValue {
                what: "X3D mode",
                value: other.to_string(),
            }),
        }
    }
}

/// A bound `amd_x3d_vcache` device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcacheDevice {
    mode_path: PathBuf,
}

impl VcacheDevice {
    /// Find the device under the driver's sysfs directory
    pub fn discover(host: &Host) -> Result<Self> {
        let driver_dir = host.vcache_driver_dir();
        let entries = sysfs::list_dir(&driver_dir).map_err(|e| {
            log::debug!("{}", e);
            Error::DriverNotFound
        })?;

        entries
            .iter()
            .filter(|name| name.starts_with(ACPI_PREFIX))
            .map(|name| driver_dir.join(name).join(MODE_ATTR))
            .find(|path| path.exists())
            .map(|mode_path| {
                log::debug!("X3D mode attribute at {}", mode_path.display());
                VcacheDevice { mode_path }
            })
            .ok_or(Error::DriverNotFound)
    }

    /// Path of the mode attribute
    pub fn mode_path(&self) -> &Path {
        &self.mode_path
    }

    /// Current mode
    pub fn mode(&self) -> Result<X3dMode> {
        sysfs::read(&self.mode_path)?.parse()
    }

    /// Switch mode
    pub fn set_mode(&self, mode: X3dMode) -> Result<()> {
        sysfs::write(&self.mode_path, mode.as_str())?;
        log::info!("X3D mode set to {}", mode);
        Ok(())
    }
}
