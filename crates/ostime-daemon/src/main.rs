//! ostime probe entry point.
//!
//! Builds the host time service from configuration, keeps it rebased by the
//! writer its discipline calls for and samples the clock until done or
//! interrupted.

mod probe;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use ostime_common::config::ClockConfig;
use ostime_runtime::rebase_timer::HostRebaser;
use ostime_runtime::service::HostTimeService;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::probe::{run_probe, ProbeReport};
use crate::signals::SignalHandler;

/// Probe command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "ostime-probe",
    about = "Sample the ostime monotonic clock and check it never goes backwards",
    version,
    long_about = None
)]
struct Args {
    /// Path to a clock configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Number of clock reads to take (0 = until interrupted).
    #[arg(long, short = 'n', default_value = "1000")]
    samples: u64,

    /// Delay between reads, e.g. "1ms" or "250us".
    #[arg(long, short = 'i', default_value = "1ms", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Print the report as a single JSON line.
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting ostime probe");

    let config = load_config(&args)?;
    info!(
        rate_hz = config.counter.rate_hz.hz(),
        strategy = %config.sync.strategy,
        rebase = config.rebase.enabled,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    let report = run(&args, &config, &signal_handler)?;
    if report.is_monotonic() {
        info!(samples = report.samples, "Probe finished");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            violations = report.violations,
            largest_backstep = report.largest_backstep,
            "Clock went backwards during the probe"
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("ostime_probe={level},ostime_runtime={level},ostime_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority:
/// 1. Command-line `--config` argument
/// 2. `OSTIME_CONFIG_PATH` environment variable
/// 3. Built-in defaults
fn load_config(args: &Args) -> Result<ClockConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ClockConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("OSTIME_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from OSTIME_CONFIG_PATH");
            return ClockConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from OSTIME_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "OSTIME_CONFIG_PATH set but file does not exist, using defaults"
        );
    }

    info!("No config file given, using built-in defaults");
    Ok(ClockConfig::default())
}

/// Build the service, run the sampling loop and print the report.
fn run(args: &Args, config: &ClockConfig, signal_handler: &SignalHandler) -> Result<ProbeReport> {
    let service =
        Arc::new(HostTimeService::from_config(config).context("Failed to create time service")?);

    // Started on this thread: under interrupt_mask the rebase signal is
    // delivered to the thread that samples the clock.
    let mut rebaser = HostRebaser::start(config, Arc::clone(&service))
        .context("Failed to start rebase timer")?;

    let check = run_probe(&service, args.samples, args.interval, || {
        signal_handler.shutdown_requested()
    });

    let signo = signal_handler.state().last_signal();
    if signo != 0 {
        info!(signo, samples = check.samples(), "Probe stopped by signal");
    }

    rebaser.stop();
    let rebase_stats = rebaser.stats();

    let report = check.report(service.rate(), config.sync.strategy, Some(rebase_stats));
    if args.json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        println!("{report}");
    }

    if rebase_stats.is_near_wrap() {
        warn!(
            max_gap = rebase_stats.max_gap,
            "Rebase gaps came close to a full counter wrap"
        );
    }

    Ok(report)
}
