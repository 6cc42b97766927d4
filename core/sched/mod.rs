//! Per-process scheduling control
//!
//! Applies CCD affinity, scheduling policy, nice value and I/O priority to
//! a running process. These are thin wrappers over `sched_setaffinity`,
//! `sched_setscheduler`, `setpriority` and `ioprio_set`.

use std::fmt;
use std::str::FromStr;

use crate::core::topology::{CcdClass, TopologyContext};
use crate::utils::bitmap::CpuSet;
use crate::{Error, Result};

/// Process id type
pub type Pid = i32;

/// Lowest (most favourable) nice value
pub const NICE_MIN: i32 = -20;

/// Highest nice value
pub const NICE_MAX: i32 = 19;

/// Highest I/O priority level within a class
pub const IOPRIO_LEVEL_MAX: u8 = 7;

/// `ioprio_set` target kind for a single process
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const IOPRIO_WHO_PROCESS: i32 = 1;

/// Bit position of the class in an I/O priority value
const IOPRIO_CLASS_SHIFT: u32 = 13;

/// Parse a process id; must be a positive integer
pub fn parse_pid(text: &str) -> Result<Pid> {
    match text.trim().parse::<Pid>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(Error::InvalidPid(text.to_string())),
    }
}

/// Non-realtime scheduling policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// `SCHED_OTHER`
    Other,
    /// `SCHED_BATCH`
    Batch,
    /// `SCHED_IDLE`
    Idle,
}

impl FromStr for SchedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "other" | "normal" => Ok(SchedPolicy::Other),
            "batch" => Ok(SchedPolicy::Batch),
            "idle" => Ok(SchedPolicy::Idle),
            _ => Err(Error::InvalidValue {
                what: "scheduling policy",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedPolicy::Other => "other",
            SchedPolicy::Batch => "batch",
            SchedPolicy::Idle => "idle",
        })
    }
}

/// I/O scheduling classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoClass {
    /// `IOPRIO_CLASS_RT`
    RealTime = 1,
    /// `IOPRIO_CLASS_BE`
    BestEffort = 2,
    /// `IOPRIO_CLASS_IDLE`
    Idle = 3,
}

/// I/O priority: class plus level `0..=7` (0 is highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoPriority {
    /// Class
    pub class: IoClass,
    /// Level within the class
    pub level: u8,
}

impl IoPriority {
    /// Value passed to `ioprio_set`
    pub fn to_raw(self) -> i32 {
        ((self.class as i32) << IOPRIO_CLASS_SHIFT) | i32::from(self.level)
    }
}

impl FromStr for IoPriority {
    type Err = Error;

    /// `rt:N`, `be:N`, `idle`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidValue {
            what: "I/O priority",
            value: s.to_string(),
        };

        let (class, level) = match s.split_once(':') {
            Some((class, level)) => (class, Some(level)),
            None => (s, None),
        };
        let class = match class {
            "rt" => IoClass::RealTime,
            "be" => IoClass::BestEffort,
            "idle" => IoClass::Idle,
            _ => return Err(invalid()),
        };
        let level = match (class, level) {
            (IoClass::Idle, None) => 0,
            (_, Some(level)) => level.parse::<u8>().map_err(|_| invalid())?,
            (_, None) => return Err(invalid()),
        };
        if level > IOPRIO_LEVEL_MAX {
            return Err(invalid());
        }
        Ok(IoPriority { class, level })
    }
}

impl fmt::Display for IoPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            IoClass::RealTime => write!(f, "rt:{}", self.level),
            IoClass::BestEffort => write!(f, "be:{}", self.level),
            IoClass::Idle => f.write_str("idle"),
        }
    }
}

/// Parse a nice value in `-20..=19`
pub fn parse_nice(text: &str) -> Result<i32> {
    match text.parse::<i32>() {
        Ok(nice) if (NICE_MIN..=NICE_MAX).contains(&nice) => Ok(nice),
        _ => Err(Error::InvalidValue {
            what: "nice value",
            value: text.to_string(),
        }),
    }
}

/// Everything a profile may change about a process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessTuning {
    /// CCD to pin to
    pub ccd: Option<CcdClass>,
    /// Scheduling policy
    pub policy: Option<SchedPolicy>,
    /// Nice value
    pub nice: Option<i32>,
    /// I/O priority
    pub io: Option<IoPriority>,
}

impl ProcessTuning {
    /// Nothing to apply
    pub fn is_empty(&self) -> bool {
        *self == ProcessTuning::default()
    }

    /// Apply each present setting to `pid`: affinity, policy, nice, I/O
    /// priority. Stops at the first failure.
    pub fn apply(&self, ctx: &TopologyContext, pid: Pid) -> Result<()> {
        if let Some(class) = self.ccd {
            pin_pid(ctx, pid, class)?;
        }
        if let Some(policy) = self.policy {
            sys::set_policy(pid, policy)?;
            log::info!("pid {}: policy {}", pid, policy);
        }
        if let Some(nice) = self.nice {
            sys::set_nice(pid, nice)?;
            log::info!("pid {}: nice {}", pid, nice);
        }
        if let Some(io) = self.io {
            sys::set_ioprio(pid, io)?;
            log::info!("pid {}: ioprio {}", pid, io);
        }
        Ok(())
    }
}

/// Restrict `pid` to the CPUs of one CCD
///
/// Fails with `DetectionFailed` rather than applying an empty mask.
pub fn pin_pid(ctx: &TopologyContext, pid: Pid, class: CcdClass) -> Result<()> {
    let cpus = ctx.detect()?.set(class);
    sys::set_affinity(pid, cpus)?;
    log::info!("pid {}: pinned to {} CCD [{}]", pid, class, cpus.to_cpu_list());
    Ok(())
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod sys {
            use super::*;

            pub fn set_affinity(pid: Pid, cpus: &CpuSet) -> Result<()> {
                // safety: cpu_set_t is plain data and all-zero is the empty set
                let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
                for cpu in cpus.iter() {
                    // safety: CpuSet ids are below CPU_SET_MAX == CPU_SETSIZE
                    unsafe { libc::CPU_SET(cpu, &mut set) };
                }
                // safety: set is a valid cpu_set_t of the size passed
                let rc = unsafe {
                    libc::sched_setaffinity(pid, std::mem::size_of::<libc::cpu_set_t>(), &set)
                };
                if rc != 0 {
                    return Err(Error::last_os_error("sched_setaffinity"));
                }
                Ok(())
            }

            pub fn set_policy(pid: Pid, policy: SchedPolicy) -> Result<()> {
                let raw = match policy {
                    SchedPolicy::Other => libc::SCHED_OTHER,
                    SchedPolicy::Batch => libc::SCHED_BATCH,
                    SchedPolicy::Idle => libc::SCHED_IDLE,
                };
                let param = libc::sched_param { sched_priority: 0 };
                // safety: param outlives the call
                let rc = unsafe { libc::sched_setscheduler(pid, raw, &param) };
                if rc != 0 {
                    return Err(Error::last_os_error("sched_setscheduler"));
                }
                Ok(())
            }

            pub fn set_nice(pid: Pid, nice: i32) -> Result<()> {
                // safety: plain syscall on integer arguments
                let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, pid as libc::id_t, nice) };
                if rc != 0 {
                    return Err(Error::last_os_error("setpriority"));
                }
                Ok(())
            }

            pub fn set_ioprio(pid: Pid, io: IoPriority) -> Result<()> {
                // safety: plain syscall on integer arguments
                let rc = unsafe {
                    libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, pid, io.to_raw())
                };
                if rc != 0 {
                    return Err(Error::last_os_error("ioprio_set"));
                }
                Ok(())
            }
        }
    } else {
        mod sys {
            use super::*;

            pub fn set_affinity(_pid: Pid, _cpus: &CpuSet) -> Result<()> {
                Err(Error::NotSupported)
            }

            pub fn set_policy(_pid: Pid, _policy: SchedPolicy) -> Result<()> {
                Err(Error::NotSupported)
            }

            pub fn set_nice(_pid: Pid, _nice: i32) -> Result<()> {
                Err(Error::NotSupported)
            }

            pub fn set_ioprio(_pid: Pid, _io: IoPriority) -> Result<()> {
                Err(Error::NotSupported)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::FakeHost;
    use test_case::test_case;

    #[test_case("1234", Some(1234))]
    #[test_case(" 42\n", Some(42) ; "surrounding whitespace")]
    #[test_case("0", None)]
    #[test_case("-5", None)]
    #[test_case("12ab", None)]
    fn test_parse_pid(text: &str, expected: Option<Pid>) {
        assert_eq!(parse_pid(text).ok(), expected);
    }

    #[test_case("rt:0", IoClass::RealTime, 0)]
    #[test_case("be:4", IoClass::BestEffort, 4)]
    #[test_case("idle", IoClass::Idle, 0)]
    fn test_parse_ioprio(text: &str, class: IoClass, level: u8) {
        let io: IoPriority = text.parse().unwrap();
        assert_eq!(io, IoPriority { class, level });
        assert_eq!(io.to_string(), text);
    }

    #[test_case("be:8" ; "level too high")]
    #[test_case("be" ; "missing level")]
    #[test_case("rt:x" ; "bad level")]
    #[test_case("fast:1" ; "unknown class")]
    fn test_parse_ioprio_rejects(text: &str) {
        assert!(text.parse::<IoPriority>().is_err());
    }

    #[test]
    fn test_ioprio_raw_value() {
        let io = IoPriority { class: IoClass::BestEffort, level: 4 };
        assert_eq!(io.to_raw(), (2 << 13) | 4);
        let idle = IoPriority { class: IoClass::Idle, level: 0 };
        assert_eq!(idle.to_raw(), 3 << 13);
    }

    #[test]
    fn test_parse_nice_and_policy() {
        assert_eq!(parse_nice("-20").unwrap(), -20);
        assert_eq!(parse_nice("19").unwrap(), 19);
        assert!(parse_nice("20").is_err());
        assert_eq!("batch".parse::<SchedPolicy>().unwrap(), SchedPolicy::Batch);
        assert_eq!("normal".parse::<SchedPolicy>().unwrap(), SchedPolicy::Other);
        assert!("fifo".parse::<SchedPolicy>().is_err());
    }

    #[test]
    fn test_pin_refuses_empty_mask() {
        let fake = FakeHost::new();
        fake.cpu(0, 32768);
        let ctx = TopologyContext::new(fake.host().clone());
        assert!(matches!(
            pin_pid(&ctx, 1, CcdClass::Cache),
            Err(Error::DetectionFailed { .. })
        ));

        let tuning = ProcessTuning {
            ccd: Some(CcdClass::Frequency),
            ..ProcessTuning::default()
        };
        assert!(matches!(tuning.apply(&ctx, 1), Err(Error::DetectionFailed { .. })));
    }

    #[test]
    fn test_empty_tuning() {
        assert!(ProcessTuning::default().is_empty());
        let tuning = ProcessTuning { nice: Some(5), ..ProcessTuning::default() };
        assert!(!tuning.is_empty());
    }
}
