//! Named process profiles
//!
//! Profiles live in a root-owned `key=value` file. Each key is
//! `<profile>.<attribute>`:
//!
//! ```text
//! # games go on the V-Cache die
//! game.ccd    = cache
//! game.nice   = -5
//! game.ioprio = be:0     # best effort, highest level
//!
//! encode.ccd    = frequency
//! encode.policy = batch
//! encode.ioprio = idle
//! ```
//!
//! Attributes are `ccd` (`cache`/`frequency`), `policy`
//! (`other`/`batch`/`idle`), `nice` (`-20..=19`) and `ioprio`
//! (`rt:N`/`be:N`/`idle`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::core::sched::{parse_nice, ProcessTuning};
use crate::utils::sysfs;
use crate::{Error, Result};

/// Where profiles are read from unless overridden
pub const DEFAULT_CONFIG_PATH: &str = "/etc/x3dctl.conf";

/// Permission bits that let someone other than the owner rewrite the file
const UNSAFE_MODE_BITS: u32 = 0o022;

/// Parsed profile file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileConfig {
    profiles: BTreeMap<String, ProcessTuning>,
}

impl ProfileConfig {
    /// Load and parse `path` after checking it is root-owned and not
    /// group/other writable
    pub fn load(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path).map_err(|e| Error::io(path, e))?;
        if !is_secure(&metadata) {
            return Err(Error::InsecureConfig(path.to_path_buf()));
        }
        let config = Self::parse(&sysfs::read(path)?)?;
        log::debug!(
            "loaded {} profile(s) from {}",
            config.profiles.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse profile text
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = ProfileConfig::default();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| config_error(line_no, "expected key=value"))?;
            let (key, value) = (key.trim(), value.trim());
            if value.is_empty() {
                return Err(config_error(line_no, format!("empty value for {}", key)));
            }

            let (profile, attr) = match key.rsplit_once('.') {
                Some((profile, attr)) if !profile.is_empty() => (profile, attr),
                _ => {
                    return Err(config_error(
                        line_no,
                        format!("key {:?} is not <profile>.<attribute>", key),
                    ))
                }
            };

            let tuning = config.profiles.entry(profile.to_string()).or_default();
            let parsed = match attr {
                "ccd" => value.parse().map(|ccd| tuning.ccd = Some(ccd)),
                "policy" => value.parse().map(|policy| tuning.policy = Some(policy)),
                "nice" => parse_nice(value).map(|nice| tuning.nice = Some(nice)),
                "ioprio" => value.parse().map(|io| tuning.io = Some(io)),
                _ => {
                    return Err(config_error(
                        line_no,
                        format!("unknown attribute {:?}", attr),
                    ))
                }
            };
            parsed.map_err(|e| config_error(line_no, e.to_string()))?;
        }

        Ok(config)
    }

    /// Look up a profile by name
    pub fn profile(&self, name: &str) -> Result<&ProcessTuning> {
        self.profiles
            .get(name)
            .ok_or_else(|| Error::UnknownProfile(name.to_string()))
    }

    /// Profile names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

fn config_error(line: usize, reason: impl Into<String>) -> Error {
    Error::Config {
        line,
        reason: reason.into(),
    }
}

/// Owned by root and not writable by group or other
fn is_secure(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    metadata.uid() == 0 && metadata.mode() & UNSAFE_MODE_BITS == 0
}
