//! GPU interrupt steering audit
//!
//! Reads back the affinity the kernel currently applies to each GPU
//! interrupt and infers the steering state from it. Nothing written by a
//! previous steering pass is trusted: an IRQ balancing daemon may have
//! rewritten any of the masks since.

use std::fmt;

use bitflags::bitflags;

use crate::core::irq::affinity::MaskKind;
use crate::core::irq::{scan_gpu_irqs, GpuDriver, IrqNumber};
use crate::core::topology::TopologyContext;
use crate::utils::bitmap::masks_equal;
use crate::utils::sysfs::{self, Host};
use crate::Result;

bitflags! {
    /// Reference masks every GPU interrupt seen so far agrees with
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Agreement: u8 {
        /// Matches the union mask
        const UNION = 1 << 0;
        /// Matches the frequency-only mask
        const FREQUENCY = 1 << 1;
        /// Matches the cache-only mask
        const CACHE = 1 << 2;
    }
}

/// Aggregate steering state of the GPU interrupts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteeringState {
    /// The interrupt table lists no GPU interrupt
    NoGpuIrqsFound,
    /// Every GPU interrupt may run on all classified CPUs
    Disabled,
    /// Every GPU interrupt is pinned to the frequency CCD
    PinnedFrequency,
    /// Every GPU interrupt is pinned to the cache CCD
    PinnedCache,
    /// Anything else
    Mixed,
}

impl SteeringState {
    /// Resolve a state; earlier rules win
    pub fn classify(gpu_irqs: usize, agreement: Agreement) -> Self {
        if gpu_irqs == 0 {
            SteeringState::NoGpuIrqsFound
        } else if agreement.contains(Agreement::UNION) {
            SteeringState::Disabled
        } else if agreement.contains(Agreement::FREQUENCY) {
            SteeringState::PinnedFrequency
        } else if agreement.contains(Agreement::CACHE) {
            SteeringState::PinnedCache
        } else {
            SteeringState::Mixed
        }
    }
}

impl fmt::Display for SteeringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SteeringState::NoGpuIrqsFound => "no GPU IRQs found",
            SteeringState::Disabled => "disabled (all CPUs)",
            SteeringState::PinnedFrequency => "pinned to frequency CCD",
            SteeringState::PinnedCache => "pinned to cache CCD",
            SteeringState::Mixed => "mixed",
        })
    }
}

/// The three reference masks of one audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMasks {
    /// Cache CCD ∪ frequency CCD
    pub union: String,
    /// Frequency CCD only
    pub frequency: String,
    /// Cache CCD only
    pub cache: String,
}

impl ReferenceMasks {
    /// References that `mask` agrees with
    pub fn agreement(&self, mask: &str) -> Agreement {
        let mut agreement = Agreement::empty();
        agreement.set(Agreement::UNION, masks_equal(mask, &self.union));
        agreement.set(Agreement::FREQUENCY, masks_equal(mask, &self.frequency));
        agreement.set(Agreement::CACHE, masks_equal(mask, &self.cache));
        agreement
    }
}

/// Current affinity of one GPU interrupt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrqAffinity {
    /// IRQ number
    pub irq: IrqNumber,
    /// Owning driver
    pub driver: GpuDriver,
    /// Mask read back from the kernel; `None` if unreadable
    pub mask: Option<String>,
}

/// Outcome of an audit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    /// Aggregate state
    pub state: SteeringState,
    /// Masks the state was inferred against
    pub references: ReferenceMasks,
    /// Per-IRQ listing in table order
    pub irqs: Vec<IrqAffinity>,
}

/// Re-read every GPU interrupt's affinity and classify the result
///
/// A degenerate topology does not fail the audit; the precedence in
/// [`SteeringState::classify`] settles ties between equal references.
pub fn audit(ctx: &TopologyContext) -> Result<AuditReport> {
    let snapshot = ctx.snapshot();
    let references = ReferenceMasks {
        union: MaskKind::Union.render(snapshot),
        frequency: MaskKind::Frequency.render(snapshot),
        cache: MaskKind::Cache.render(snapshot),
    };

    let gpu_irqs = scan_gpu_irqs(ctx.host())?;
    let mut agreement = Agreement::all();
    let mut irqs = Vec::with_capacity(gpu_irqs.len());

    for gpu in gpu_irqs {
        let mask = match sysfs::read(&ctx.host().irq_affinity(gpu.irq)) {
            Ok(text) => Some(text.trim().to_string()),
            Err(e) => {
                log::warn!("IRQ {}: {}", gpu.irq, e);
                None
            }
        };
        agreement &= match &mask {
            Some(mask) => references.agreement(mask),
            None => Agreement::empty(),
        };
        irqs.push(IrqAffinity {
            irq: gpu.irq,
            driver: gpu.driver,
            mask,
        });
    }

    let state = SteeringState::classify(irqs.len(), agreement);
    log::debug!("GPU IRQ steering: {}", state);
    Ok(AuditReport {
        state,
        references,
        irqs,
    })
}

/// Whether an `irqbalance` process is running on `host`
///
/// An active balancer may silently override steering at any time.
pub fn irqbalance_active(host: &Host) -> bool {
    let proc_dir = host.proc_dir();
    let entries = match sysfs::list_dir(&proc_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("{}", e);
            return false;
        }
    };

    entries
        .iter()
        .filter(|name| name.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|pid| sysfs::read(&proc_dir.join(pid).join("comm")).ok())
        .any(|comm| comm.trim() == "irqbalance")
}
