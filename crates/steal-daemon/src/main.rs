//! Stolen-time daemon entry point.
//!
//! Wires the sampling loop to a runstate source (the guest-visible
//! `/proc/stat` steal counters, or a simulation) and runs it under
//! signal-driven lifecycle control, reporting the published counter
//! periodically and on SIGHUP.

mod diagnostics;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use steal_common::config::{AccountingConfig, NS_PER_SEC};
use steal_runtime::{
    AccountingModule, CpuSet, ModuleEvent, RunstateSource, SamplingLoop, SimulatedRunstateSource,
};

use crate::diagnostics::{format_prometheus_metrics, StealSnapshot};
use crate::signals::SignalHandler;

/// Stolen-time daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "steal-daemon",
    about = "Stolen CPU time accounting daemon - publishes hypervisor-stolen scheduler ticks",
    version,
    long_about = None
)]
struct Args {
    /// Path to an accounting configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scheduler tick frequency in Hz (overrides config; also sets the
    /// sampling period to one tick).
    #[arg(long, value_name = "HZ")]
    frequency_hz: Option<u32>,

    /// Sample a simulated runstate source instead of the host.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Sample CPUs 0..N instead of every online CPU.
    #[arg(long, value_name = "N")]
    cpus: Option<u32>,

    /// Exit after this long (e.g. "30s", "5m"); default is to run until
    /// signaled.
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    run_for: Option<Duration>,

    /// Write Prometheus text metrics to this file on every report.
    #[arg(long, value_name = "FILE")]
    metrics_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting stolen-time accounting daemon"
    );

    let mut config = load_config(&args)?;

    if let Some(hz) = args.frequency_hz {
        config.scheduler_hz = hz;
        if hz > 0 {
            config.sample_period = Duration::from_nanos(NS_PER_SEC / u64::from(hz));
        }
    }
    config.validate().context("invalid configuration")?;

    info!(
        scheduler_hz = config.scheduler_hz,
        sample_period_us = config.sample_period.as_micros() as u64,
        "configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("failed to set up signal handlers")?;

    run_daemon(&config, &args, &signal_handler)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "steal_daemon={},steal_runtime={},steal_common={}",
        level, level, level
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `STEAL_CONFIG_PATH` environment variable
/// 3. `/etc/steal/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<AccountingConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "loading config from command-line argument");
        return AccountingConfig::from_file(config_path)
            .with_context(|| format!("failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("STEAL_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "loading config from STEAL_CONFIG_PATH");
            return AccountingConfig::from_file(&config_path).with_context(|| {
                format!("failed to load config from STEAL_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "STEAL_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from("/etc/steal/config.toml");
    if system_path.exists() {
        info!(?system_path, "loading config from system path");
        return AccountingConfig::from_file(&system_path)
            .with_context(|| format!("failed to load config from {system_path:?}"));
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "loading config from local path");
        return AccountingConfig::from_file(&local_path)
            .with_context(|| format!("failed to load config from {local_path:?}"));
    }

    info!("no config file found, using built-in defaults");
    Ok(AccountingConfig::default())
}

/// Pick the runstate source. The simulation handle stays with the caller
/// so synthetic steal can be fed while the loop samples.
fn build_source(args: &Args) -> Result<(Box<dyn RunstateSource>, Option<SimulatedRunstateSource>)> {
    if args.simulated {
        let sim = SimulatedRunstateSource::new();
        return Ok((Box::new(sim.clone()), Some(sim)));
    }

    #[cfg(target_os = "linux")]
    {
        Ok((Box::new(steal_runtime::ProcStatSource::new()), None))
    }

    #[cfg(not(target_os = "linux"))]
    {
        anyhow::bail!("no host runstate source on this platform; run with --simulated")
    }
}

/// Run the accounting domain until signaled, a `--run-for` deadline, or a
/// lifecycle failure.
fn run_daemon(config: &AccountingConfig, args: &Args, signals: &SignalHandler) -> Result<()> {
    let cpus = match args.cpus {
        Some(n) => CpuSet::first(n),
        None => CpuSet::online().context("failed to enumerate online CPUs")?,
    };

    let (source, sim) = build_source(args)?;
    let sampler = SamplingLoop::new(source, cpus, config)?;
    let mut module = AccountingModule::new(sampler);

    let started = Instant::now();
    module
        .handle_event(ModuleEvent::Load)
        .context("module load failed")?;
    info!(
        cpus = module.sampler().cpus().len(),
        simulated = sim.is_some(),
        "accounting started"
    );

    let mut last_report = Instant::now();
    let mut last_feed = Instant::now();
    loop {
        if signals.shutdown_requested() {
            info!("shutdown requested");
            break;
        }
        if let Some(limit) = args.run_for {
            if started.elapsed() >= limit {
                info!("run duration reached");
                break;
            }
        }

        if let Some(sim) = &sim {
            feed_simulation(sim, module.sampler().cpus(), last_feed.elapsed());
            last_feed = Instant::now();
        }

        if signals.take_report_request() || last_report.elapsed() >= config.report_interval {
            last_report = Instant::now();
            report(&module, config, started.elapsed(), args.metrics_file.as_deref())?;
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    module
        .handle_event(ModuleEvent::Unload)
        .context("module unload failed")?;
    report(&module, config, started.elapsed(), args.metrics_file.as_deref())?;
    info!(
        stolen_ticks = module.counter().total(),
        signals_received = signals.state().signal_count(),
        "daemon exiting"
    );

    Ok(())
}

/// Synthesize ~5% steal on every simulated CPU for the elapsed wall time.
fn feed_simulation(source: &SimulatedRunstateSource, cpus: &CpuSet, elapsed: Duration) {
    let stolen_ns = (elapsed.as_nanos() / 20) as u64;
    for cpu in cpus.iter() {
        source.advance(cpu, stolen_ns, 0);
    }
}

/// Log the current counter and optionally write the metrics file.
fn report<S: RunstateSource + 'static>(
    module: &AccountingModule<S>,
    config: &AccountingConfig,
    uptime: Duration,
    metrics_file: Option<&Path>,
) -> Result<()> {
    let snapshot = StealSnapshot::capture(module, config, uptime);
    info!(
        stolen_ticks = snapshot.stolen_ticks,
        state = %snapshot.state,
        uptime_s = snapshot.uptime.as_secs(),
        "stolen-time report"
    );
    debug!(json = %snapshot.to_json(), "diagnostics snapshot");

    if let Some(path) = metrics_file {
        std::fs::write(path, format_prometheus_metrics(&snapshot))
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }

    Ok(())
}
