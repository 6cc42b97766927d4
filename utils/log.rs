//! Logging setup for x3dctl
//!
//! The library logs through the `log` facade only. The binary installs a
//! `pretty_env_logger` backend here; `RUST_LOG` overrides the level picked
//! from the command line.

use log::LevelFilter;

/// Level used when no verbosity flag is given
pub fn default_level() -> LevelFilter {
    if cfg!(all(feature = "debug", feature = "verbose")) {
        LevelFilter::Trace
    } else if cfg!(feature = "debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// Install the global logger at the more verbose of `requested` and the
/// build default
pub fn init(requested: LevelFilter) {
    let level = requested.max(default_level());
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(level).parse_default_env();
    // A logger may already be installed when embedded; keep that one.
    if builder.try_init().is_err() {
        log::debug!("logger already initialised");
    }
}
