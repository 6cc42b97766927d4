//! CCD topology detection
//!
//! Dual-CCD X3D parts carry the stacked V-Cache on one die only, so the
//! two dies report very different L3 (`cache/index3`) sizes. Each logical
//! CPU is classified by that size into the cache CCD or the frequency CCD.

use std::cell::OnceCell;
use std::fmt;
use std::str::FromStr;

use crate::utils::bitmap::{CpuSet, CPU_SET_MAX};
use crate::utils::sysfs::{self, Host};
use crate::{Error, Result};

/// L3 size (KB) above which a CPU is considered to sit on the V-Cache die.
///
/// Heuristic for known parts: a plain Zen 4/5 CCD reports 32 MB, a V-Cache
/// CCD 96 MB. Tunable; not derived from any kernel value.
pub const VCACHE_L3_THRESHOLD_KB: u64 = 50_000;

/// Which core complex die a CPU belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CcdClass {
    /// Die with stacked V-Cache
    Cache,
    /// Die without V-Cache, higher boost clocks
    Frequency,
}

impl CcdClass {
    /// Classify an index3 cache size; `None` for zero
    pub fn from_l3_size(size_kb: u64) -> Option<Self> {
        if size_kb > VCACHE_L3_THRESHOLD_KB {
            Some(CcdClass::Cache)
        } else if size_kb > 0 {
            Some(CcdClass::Frequency)
        } else {
            None
        }
    }

    /// Lower-case name used on the command line and in config files
    pub fn as_str(self) -> &'static str {
        match self {
            CcdClass::Cache => "cache",
            CcdClass::Frequency => "frequency",
        }
    }
}

impl fmt::Display for CcdClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CcdClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cache" => Ok(CcdClass::Cache),
            "frequency" => Ok(CcdClass::Frequency),
            _ => Err(Error::InvalidValue {
                what: "CCD class",
                value: s.to_string(),
            }),
        }
    }
}

/// The two disjoint CPU sets found by one topology scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    /// CPUs on the V-Cache die
    pub cache: CpuSet,
    /// CPUs on the frequency die
    pub frequency: CpuSet,
}

impl TopologySnapshot {
    /// CPUs of one class
    pub fn set(&self, class: CcdClass) -> &CpuSet {
        match class {
            CcdClass::Cache => &self.cache,
            CcdClass::Frequency => &self.frequency,
        }
    }

    /// Every classified CPU
    pub fn union(&self) -> CpuSet {
        self.cache.union(&self.frequency)
    }

    /// Both classes are populated
    pub fn is_complete(&self) -> bool {
        !self.cache.is_empty() && !self.frequency.is_empty()
    }

    /// Fail unless both classes are populated
    pub fn require_complete(&self) -> Result<&Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(Error::DetectionFailed {
                cache: self.cache.count(),
                frequency: self.frequency.count(),
            })
        }
    }
}

/// Scan the per-CPU cache metadata under `host`
///
/// An unreadable CPU directory yields an empty snapshot; CPUs without a
/// readable, non-zero index3 size are left out of both sets.
pub fn scan(host: &Host) -> TopologySnapshot {
    let mut snapshot = TopologySnapshot::default();

    let cpu_dir = host.cpu_dir();
    let entries = match sysfs::list_dir(&cpu_dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("{}", e);
            return snapshot;
        }
    };

    for name in entries {
        let cpu = match parse_cpu_dir_name(&name) {
            Some(cpu) if cpu < CPU_SET_MAX => cpu,
            _ => continue,
        };

        let size_kb = match sysfs::read(&host.l3_size(cpu)) {
            Ok(text) => match sysfs::parse_leading_u64(&text) {
                Some(size) => size,
                None => {
                    log::debug!("cpu{}: malformed index3 size {:?}", cpu, text.trim());
                    continue;
                }
            },
            Err(e) => {
                log::debug!("cpu{}: {}", cpu, e);
                continue;
            }
        };

        match CcdClass::from_l3_size(size_kb) {
            Some(CcdClass::Cache) => {
                snapshot.cache.set(cpu);
            }
            Some(CcdClass::Frequency) => {
                snapshot.frequency.set(cpu);
            }
            None => log::debug!("cpu{}: zero index3 size, unclassified", cpu),
        }
    }

    log::debug!(
        "topology: cache CCD [{}], frequency CCD [{}]",
        snapshot.cache.to_cpu_list(),
        snapshot.frequency.to_cpu_list()
    );
    snapshot
}

/// `cpu<digits>` → id; `cpufreq`, `cpuidle` and friends are rejected
fn parse_cpu_dir_name(name: &str) -> Option<usize> {
    let digits = name.strip_prefix("cpu")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Per-invocation topology state
///
/// Owns the host root and a once-initialised snapshot. The scan runs on
/// first use and is never repeated for the lifetime of the context.
#[derive(Debug)]
pub struct TopologyContext {
    host: Host,
    snapshot: OnceCell<TopologySnapshot>,
}

impl TopologyContext {
    /// Create a context for `host`; nothing is scanned yet
    pub fn new(host: Host) -> Self {
        Self {
            host,
            snapshot: OnceCell::new(),
        }
    }

    /// Host this context reads from
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// The snapshot, scanning on first call. May be incomplete.
    pub fn snapshot(&self) -> &TopologySnapshot {
        self.snapshot.get_or_init(|| scan(&self.host))
    }

    /// The snapshot, or `DetectionFailed` if either class is empty
    pub fn detect(&self) -> Result<&TopologySnapshot> {
        self.snapshot().require_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::FakeHost;
    use test_case::test_case;

    #[test_case(98304, Some(CcdClass::Cache) ; "vcache die")]
    #[test_case(50001, Some(CcdClass::Cache) ; "just above threshold")]
    #[test_case(50000, Some(CcdClass::Frequency) ; "at threshold")]
    #[test_case(32768, Some(CcdClass::Frequency) ; "plain die")]
    #[test_case(0, None ; "no cache")]
    fn test_classify(size_kb: u64, expected: Option<CcdClass>) {
        assert_eq!(CcdClass::from_l3_size(size_kb), expected);
    }

    #[test_case("cpu0", Some(0))]
    #[test_case("cpu127", Some(127))]
    #[test_case("cpufreq", None)]
    #[test_case("cpuidle", None)]
    #[test_case("cpu", None)]
    #[test_case("cpu1a", None)]
    #[test_case("online", None)]
    fn test_parse_cpu_dir_name(name: &str, expected: Option<usize>) {
        assert_eq!(parse_cpu_dir_name(name), expected);
    }

    #[test]
    fn test_scan_partitions_cpus() {
        let fake = FakeHost::new();
        fake.cpu(0, 70000).cpu(1, 70000).cpu(2, 20000).cpu(3, 0);
        fake.file("sys/devices/system/cpu/cpufreq/policy0/scaling_driver", "amd-pstate\n");

        let snapshot = scan(fake.host());
        assert_eq!(snapshot.cache.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(snapshot.frequency.iter().collect::<Vec<_>>(), vec![2]);
        assert!(!snapshot.union().test(3));
    }

    #[test]
    fn test_scan_skips_missing_and_malformed_sizes() {
        let fake = FakeHost::new();
        fake.cpu(0, 98304).cpu(1, 32768).cpu_without_cache(2);
        fake.file("sys/devices/system/cpu/cpu3/cache/index3/size", "garbage\n");

        let snapshot = scan(fake.host());
        assert_eq!(snapshot.cache.count(), 1);
        assert_eq!(snapshot.frequency.count(), 1);
        assert!(!snapshot.union().test(2));
        assert!(!snapshot.union().test(3));
    }

    #[test]
    fn test_missing_cpu_dir_fails_detection() {
        let fake = FakeHost::new();
        let ctx = TopologyContext::new(fake.host().clone());
        assert!(ctx.snapshot().cache.is_empty());
        assert!(ctx.snapshot().frequency.is_empty());
        assert!(matches!(
            ctx.detect(),
            Err(Error::DetectionFailed { cache: 0, frequency: 0 })
        ));
    }

    #[test]
    fn test_single_class_fails_detection() {
        let fake = FakeHost::new();
        fake.cpu(0, 32768).cpu(1, 32768);
        let ctx = TopologyContext::new(fake.host().clone());
        assert!(matches!(
            ctx.detect(),
            Err(Error::DetectionFailed { cache: 0, frequency: 2 })
        ));
    }

    #[test]
    fn test_detection_is_memoized() {
        let fake = FakeHost::new();
        fake.dual_ccd();
        let ctx = TopologyContext::new(fake.host().clone());

        let first = *ctx.detect().unwrap();
        let first_ptr: *const TopologySnapshot = ctx.snapshot();

        // Rewrite the tree; the context must not notice.
        for cpu in 0..16 {
            fake.cpu(cpu, 32768);
        }
        fake.cpu(16, 98304);

        let second = ctx.detect().unwrap();
        assert_eq!(*second, first);
        assert!(std::ptr::eq(first_ptr, second));
        assert_eq!(second.cache.to_kernel_hex(), "ff");
        assert_eq!(second.frequency.to_kernel_hex(), "ff00");

        // A fresh context re-detects.
        let fresh = TopologyContext::new(fake.host().clone());
        assert_eq!(fresh.snapshot().cache.iter().collect::<Vec<_>>(), vec![16]);
    }

    #[test]
    fn test_ccd_class_parse() {
        assert_eq!("cache".parse::<CcdClass>().unwrap(), CcdClass::Cache);
        assert_eq!("frequency".parse::<CcdClass>().unwrap(), CcdClass::Frequency);
        assert!("Cache".parse::<CcdClass>().is_err());
        assert_eq!(CcdClass::Frequency.to_string(), "frequency");
    }
}
