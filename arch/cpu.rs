//! CPU identification
//!
//! The model string is shown in status output only; nothing is decided
//! from it.

use crate::utils::sysfs::{self, Host};

/// Model string of the first CPU listed in `/proc/cpuinfo`
pub fn model_name(host: &Host) -> Option<String> {
    let cpuinfo = match sysfs::read(&host.cpuinfo()) {
        Ok(text) => text,
        Err(e) => {
            log::debug!("{}", e);
            return None;
        }
    };
    parse_model_name(&cpuinfo)
}

fn parse_model_name(cpuinfo: &str) -> Option<String> {
    cpuinfo.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "model name").then(|| value.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::FakeHost;

    #[test]
    fn test_model_name() {
        let fake = FakeHost::new();
        fake.file(
            "proc/cpuinfo",
            "processor\t: 0\nvendor_id\t: AuthenticAMD\ncpu family\t: 25\n\
             model name\t: AMD Ryzen 9 7950X3D 16-Core Processor\n\
             processor\t: 1\nmodel name\t: ignored\n",
        );
        assert_eq!(
            model_name(fake.host()).as_deref(),
            Some("AMD Ryzen 9 7950X3D 16-Core Processor")
        );
    }

    #[test]
    fn test_model_name_missing() {
        let fake = FakeHost::new();
        assert_eq!(model_name(fake.host()), None);
        assert_eq!(parse_model_name("processor\t: 0\n"), None);
    }
}
