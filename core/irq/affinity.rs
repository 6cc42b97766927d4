//! GPU interrupt steering
//!
//! Writes one target mask to the `smp_affinity` file of every GPU-owned
//! interrupt. Steering is best-effort: a failing IRQ is recorded and the
//! loop carries on with the rest.

use std::fmt;
use std::str::FromStr;

use crate::core::irq::{scan_gpu_irqs, IrqNumber};
use crate::core::topology::{TopologyContext, TopologySnapshot};
use crate::utils::bitmap::CpuSet;
use crate::utils::sysfs;
use crate::{Error, Result};

/// Named steering targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskKind {
    /// Every classified CPU; restores default spreading
    Union,
    /// Frequency CCD only; keeps GPU interrupts off the V-Cache die
    Frequency,
    /// Cache CCD only; explicit opt-in
    Cache,
}

impl MaskKind {
    /// CPU set this target selects
    pub fn cpus(self, snapshot: &TopologySnapshot) -> CpuSet {
        match self {
            MaskKind::Union => snapshot.union(),
            MaskKind::Frequency => snapshot.frequency,
            MaskKind::Cache => snapshot.cache,
        }
    }

    /// Kernel mask string for this target
    pub fn render(self, snapshot: &TopologySnapshot) -> String {
        self.cpus(snapshot).to_kernel_hex()
    }

    /// Name used on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            MaskKind::Union => "default",
            MaskKind::Frequency => "frequency",
            MaskKind::Cache => "cache",
        }
    }
}

impl fmt::Display for MaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MaskKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "default" | "union" => Ok(MaskKind::Union),
            "frequency" => Ok(MaskKind::Frequency),
            "cache" => Ok(MaskKind::Cache),
            _ => Err(Error::InvalidValue {
                what: "IRQ target",
                value: s.to_string(),
            }),
        }
    }
}

/// Steering options chosen at the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SteerPolicy {
    /// Permit [`MaskKind::Cache`] as a target
    pub allow_cache_ccd: bool,
}

/// One IRQ whose affinity could not be written
#[derive(Debug)]
pub struct SteerFailure {
    /// IRQ number
    pub irq: IrqNumber,
    /// Why the write failed
    pub error: Error,
}

/// How much of a steering pass landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteerOutcome {
    /// No GPU interrupt in the table
    NothingToSteer,
    /// Every GPU interrupt took the mask
    Full,
    /// Some writes failed
    Partial,
}

/// Result of a steering pass
#[derive(Debug)]
pub struct SteerReport {
    /// Target requested
    pub target: MaskKind,
    /// Mask string written
    pub mask: String,
    /// GPU interrupts found
    pub attempted: usize,
    /// Writes that succeeded
    pub succeeded: usize,
    /// Writes that failed
    pub failures: Vec<SteerFailure>,
}

impl SteerReport {
    /// Classify the pass
    pub fn outcome(&self) -> SteerOutcome {
        if self.attempted == 0 {
            SteerOutcome::NothingToSteer
        } else if self.failures.is_empty() {
            SteerOutcome::Full
        } else {
            SteerOutcome::Partial
        }
    }
}

/// Write the `target` mask to every GPU interrupt
///
/// Fails before writing anything if the target is refused by `policy`,
/// topology detection failed, or the interrupt table cannot be read.
/// Per-IRQ write failures are collected in the report.
pub fn steer(ctx: &TopologyContext, target: MaskKind, policy: SteerPolicy) -> Result<SteerReport> {
    if target == MaskKind::Cache && !policy.allow_cache_ccd {
        return Err(Error::CacheTargetRefused);
    }

    let snapshot = ctx.detect()?;
    let mask = target.render(snapshot);
    let irqs = scan_gpu_irqs(ctx.host())?;

    let mut report = SteerReport {
        target,
        mask,
        attempted: irqs.len(),
        succeeded: 0,
        failures: Vec::new(),
    };

    for gpu in irqs {
        let path = ctx.host().irq_affinity(gpu.irq);
        match sysfs::write(&path, &report.mask) {
            Ok(()) => {
                log::debug!("IRQ {} ({}) -> {}", gpu.irq, gpu.driver, report.mask);
                report.succeeded += 1;
            }
            Err(error) => {
                log::debug!("IRQ {} ({}) not steered: {}", gpu.irq, gpu.driver, error);
                report.failures.push(SteerFailure { irq: gpu.irq, error });
            }
        }
    }

    log::info!(
        "steered {}/{} GPU interrupt(s) to {} ({})",
        report.succeeded,
        report.attempted,
        target,
        report.mask
    );
    Ok(report)
}
