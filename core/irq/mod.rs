//! Interrupt table scanning
//!
//! Reads the live interrupt table (`/proc/interrupts`) and picks out the
//! lines owned by a GPU driver. Steering and auditing both work from the
//! list produced here.

use std::fmt;

use crate::utils::sysfs::{self, Host};
use crate::Result;

pub mod affinity;
pub mod audit;

/// Interrupt number type
pub type IrqNumber = u32;

/// GPU drivers whose interrupts are steered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuDriver {
    /// AMD `amdgpu`
    Amdgpu,
    /// NVIDIA proprietary / open kernel module
    Nvidia,
    /// Open-source `nouveau`
    Nouveau,
}

impl GpuDriver {
    /// Every known driver, in match order
    pub const ALL: [GpuDriver; 3] = [GpuDriver::Amdgpu, GpuDriver::Nvidia, GpuDriver::Nouveau];

    /// Case-sensitive substring identifying the driver in an interrupt
    /// description
    pub const fn signature(self) -> &'static str {
        match self {
            GpuDriver::Amdgpu => "amdgpu",
            GpuDriver::Nvidia => "nvidia",
            GpuDriver::Nouveau => "nouveau",
        }
    }

    /// Driver owning an interrupt with this description, if any
    pub fn classify(description: &str) -> Option<GpuDriver> {
        GpuDriver::ALL
            .into_iter()
            .find(|driver| description.contains(driver.signature()))
    }
}

impl fmt::Display for GpuDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature())
    }
}

/// One numbered line of the interrupt table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptLine<'a> {
    /// IRQ number
    pub irq: IrqNumber,
    /// Everything after the colon: per-CPU counts, chip, device names
    pub description: &'a str,
}

impl<'a> InterruptLine<'a> {
    /// Parse one table line
    ///
    /// Returns `None` for the header, architecture rows (`NMI:`, `LOC:`)
    /// and any line whose id is not a positive integer.
    pub fn parse(line: &'a str) -> Option<Self> {
        let (id, description) = line.split_once(':')?;
        let irq: i64 = id.trim().parse().ok()?;
        if irq <= 0 {
            return None;
        }
        let irq = IrqNumber::try_from(irq).ok()?;
        Some(Self { irq, description })
    }

    /// GPU driver owning this line, if any
    pub fn gpu_driver(&self) -> Option<GpuDriver> {
        GpuDriver::classify(self.description)
    }
}

/// A GPU-owned interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuIrq {
    /// IRQ number
    pub irq: IrqNumber,
    /// Owning driver
    pub driver: GpuDriver,
}

/// GPU-owned interrupts of an interrupt table, in table order
pub fn parse_gpu_irqs(table: &str) -> Vec<GpuIrq> {
    table
        .lines()
        .filter_map(InterruptLine::parse)
        .filter_map(|line| {
            line.gpu_driver().map(|driver| GpuIrq {
                irq: line.irq,
                driver,
            })
        })
        .collect()
}

/// Read the live interrupt table of `host` and return its GPU interrupts
pub fn scan_gpu_irqs(host: &Host) -> Result<Vec<GpuIrq>> {
    let table = sysfs::read(&host.interrupts())?;
    let irqs = parse_gpu_irqs(&table);
    log::debug!("found {} GPU interrupt(s)", irqs.len());
    Ok(irqs)
}
