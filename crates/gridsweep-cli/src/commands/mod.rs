//! CLI commands implementation

use anyhow::{bail, Context, Result};
use gridsweep_core::{DeviceSet, SweepConfig, SweepFile};
use gridsweep_runtime::{ProcessExecutor, ProcessExecutorConfig};
use gridsweep_scheduler::{Scheduler, SweepReport};
use gridsweep_store::LocalStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Global flags that override the sweep file
#[derive(Debug, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub devices: Option<String>,
}

/// Flags of the `run` command
#[derive(Debug, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub no_markers: bool,
    pub report: Option<PathBuf>,
}

/// Print every run's command line
pub async fn plan(file: &Path, overrides: &Overrides) -> Result<()> {
    let config = load(file, overrides)?;
    let scheduler = build_scheduler(&config)?;

    for run in scheduler.plan() {
        println!("command {}: {}", run.index + 1, run.command);
    }

    Ok(())
}

/// Dispatch the sweep and print a summary
pub async fn run(file: &Path, overrides: &Overrides, options: RunOptions) -> Result<()> {
    let mut config = load(file, overrides)?;
    if options.dry_run {
        config.dry_run = true;
    }
    if options.no_markers {
        config.scheduling.write_markers = false;
    }

    let scheduler = build_scheduler(&config)?;

    if config.dry_run {
        for run in scheduler.plan() {
            println!("command {}: {}", run.index + 1, run.command);
        }
        return Ok(());
    }

    let status = scheduler.status().await?;
    println!(
        "Commands:\tRunnable: {}\tFinished: {}\tTotal: {}",
        status.runnable(),
        status.finished,
        status.total
    );

    let cancel = scheduler.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, no further runs will be started");
            cancel.cancel();
        }
    });

    let report = scheduler.run().await;
    print_summary(&report);

    if let Some(path) = options.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    if !report.is_success() {
        bail!("{} of {} runs failed", report.failed(), report.total());
    }

    Ok(())
}

fn load(file: &Path, overrides: &Overrides) -> Result<SweepConfig> {
    let sweep = SweepFile::from_file(file)
        .with_context(|| format!("Failed to load sweep file {}", file.display()))?;
    init_logging(overrides.log_level.as_deref().unwrap_or(&sweep.logging.level))?;

    let mut config = sweep.into_config()?;
    if let Some(list) = &overrides.devices {
        override_devices(&mut config, list)?;
    }
    Ok(config)
}

fn override_devices(config: &mut SweepConfig, list: &str) -> Result<()> {
    let devices =
        DeviceSet::parse(list).with_context(|| format!("Invalid device list '{}'", list))?;
    info!(devices = %list, "Device list overridden from the command line");
    config.scheduling.devices = devices.devices().to_vec();
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

fn build_scheduler(config: &SweepConfig) -> Result<Scheduler> {
    let executor = ProcessExecutor::new(ProcessExecutorConfig {
        launch: config.launch.clone(),
        env: Vec::new(),
    });
    let scheduler = Scheduler::new(config, Arc::new(executor), Arc::new(LocalStore::new()))?;
    Ok(scheduler)
}

fn print_summary(report: &SweepReport) {
    println!("{}", report);
    for failure in report.failures() {
        println!(
            "  run {} failed: {} ({})",
            failure.index + 1,
            failure.error.as_deref().unwrap_or("unknown error"),
            failure.output_root.display()
        );
    }
}
