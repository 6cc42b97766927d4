//! x3dctl command-line entry point
//!
//! Parses arguments, installs the logger and dispatches to the library.
//! All kernel access goes through the real `/sys` and `/proc`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::Verbosity;
use eyre::WrapErr;

use x3dctl::config::{ProfileConfig, DEFAULT_CONFIG_PATH};
use x3dctl::core::irq::audit::{audit, irqbalance_active};
use x3dctl::core::sched::{self, pin_pid};
use x3dctl::drivers::{VcacheDevice, X3dMode};
use x3dctl::{
    steer, CcdClass, Host, MaskKind, SteerOutcome, SteerPolicy, SteerReport, TopologyContext,
};

/// Control AMD 3D V-Cache CCD mode, GPU interrupt steering and process placement
#[derive(Debug, Parser)]
#[command(name = "x3dctl", version)]
struct Cli {
    #[command(flatten)]
    verbose: Verbosity,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Switch the driver to cache mode
    Cache {
        /// Also pin GPU interrupts to the frequency CCD
        #[arg(long)]
        steer_irqs: bool,
    },
    /// Switch the driver to frequency mode
    Frequency {
        /// Also restore GPU interrupts to all CPUs
        #[arg(long)]
        steer_irqs: bool,
    },
    /// Show mode, topology and GPU interrupt steering
    Status,
    /// Pin a process to one CCD
    Pin {
        /// Target process id
        pid: String,
        /// `cache` or `frequency`
        ccd: CcdClass,
    },
    /// Steer GPU interrupts
    Irq {
        /// `default` (all CPUs), `frequency` or `cache`
        target: MaskKind,
        /// Permit pinning GPU interrupts onto the cache CCD
        #[arg(long)]
        allow_cache_ccd: bool,
    },
    /// Apply a named profile to a process
    Profile {
        /// Profile name
        name: String,
        /// Target process id
        pid: String,
        /// Profile file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() -> eyre::Result<ExitCode> {
    let cli = Cli::parse();
    x3dctl::utils::log::init(cli.verbose.log_level_filter());

    let ctx = TopologyContext::new(Host::system());
    match cli.command {
        Command::Cache { steer_irqs } => {
            switch_mode(&ctx, X3dMode::Cache, steer_irqs.then_some(MaskKind::Frequency))
        }
        Command::Frequency { steer_irqs } => {
            switch_mode(&ctx, X3dMode::Frequency, steer_irqs.then_some(MaskKind::Union))
        }
        Command::Status => status(&ctx),
        Command::Pin { pid, ccd } => {
            let pid = sched::parse_pid(&pid)?;
            pin_pid(&ctx, pid, ccd)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Irq {
            target,
            allow_cache_ccd,
        } => {
            let report = steer(&ctx, target, SteerPolicy { allow_cache_ccd })?;
            print_steer_report(&report);
            Ok(ExitCode::SUCCESS)
        }
        Command::Profile { name, pid, config } => {
            let pid = sched::parse_pid(&pid)?;
            let profiles = ProfileConfig::load(&config)
                .wrap_err_with(|| format!("loading profiles from {}", config.display()))?;
            profiles.profile(&name)?.apply(&ctx, pid)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn switch_mode(ctx: &TopologyContext, mode: X3dMode, irq_target: Option<MaskKind>) -> eyre::Result<ExitCode> {
    let device = VcacheDevice::discover(ctx.host())?;
    device.set_mode(mode)?;
    println!("X3D mode: {}", mode);

    if let Some(target) = irq_target {
        let report = steer(ctx, target, SteerPolicy::default())?;
        print_steer_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_steer_report(report: &SteerReport) {
    match report.outcome() {
        SteerOutcome::NothingToSteer => println!("GPU IRQs: none found"),
        SteerOutcome::Full => println!(
            "GPU IRQs: {} steered to {} ({})",
            report.succeeded, report.target, report.mask
        ),
        SteerOutcome::Partial => {
            println!(
                "GPU IRQs: {}/{} steered to {} ({})",
                report.succeeded, report.attempted, report.target, report.mask
            );
            for failure in &report.failures {
                println!("  IRQ {}: {}", failure.irq, failure.error);
            }
        }
    }
}

fn status(ctx: &TopologyContext) -> eyre::Result<ExitCode> {
    let host = ctx.host();

    if let Some(model) = x3dctl::arch::model_name(host) {
        println!("CPU: {}", model);
    }

    match VcacheDevice::discover(host).and_then(|device| device.mode()) {
        Ok(mode) => println!("X3D mode: {}", mode),
        Err(e) => println!("X3D mode: unavailable ({})", e),
    }

    let snapshot = ctx.snapshot();
    println!("Cache CCD CPUs: {}", cpu_list_or_none(&snapshot.cache.to_cpu_list()));
    println!(
        "Frequency CCD CPUs: {}",
        cpu_list_or_none(&snapshot.frequency.to_cpu_list())
    );
    if let Err(e) = ctx.detect() {
        println!("Warning: {}", e);
    }

    let report = audit(ctx)?;
    println!("GPU IRQ steering: {}", report.state);
    for irq in &report.irqs {
        println!(
            "  IRQ {:>4} ({}): {}",
            irq.irq,
            irq.driver,
            irq.mask.as_deref().unwrap_or("unreadable")
        );
    }

    if irqbalance_active(host) {
        println!("irqbalance: running (may override GPU IRQ steering)");
    } else {
        println!("irqbalance: not running");
    }

    Ok(ExitCode::SUCCESS)
}

fn cpu_list_or_none(list: &str) -> &str {
    if list.is_empty() {
        "none detected"
    } else {
        list
    }
}
