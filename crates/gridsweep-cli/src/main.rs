//! gridsweep CLI
//!
//! Expands a parameter sweep from a TOML file and runs it across devices.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// gridsweep - parameter sweeps over a pool of devices
#[derive(Parser, Debug)]
#[command(name = "gridsweep")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (overrides the sweep file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Comma-separated device ids (overrides the sweep file), e.g. `0,1,3`
    #[arg(long, global = true)]
    devices: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the command line of every run without executing anything
    Plan {
        /// Sweep file
        file: PathBuf,
    },

    /// Execute every run that has not finished yet
    Run {
        /// Sweep file
        file: PathBuf,

        /// Print commands instead of running them
        #[arg(long)]
        dry_run: bool,

        /// Do not write completion markers
        #[arg(long)]
        no_markers: bool,

        /// Write the sweep report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let overrides = commands::Overrides {
        log_level: cli.log_level,
        devices: cli.devices,
    };

    match cli.command {
        Commands::Plan { file } => {
            commands::plan(&file, &overrides).await?;
        }
        Commands::Run {
            file,
            dry_run,
            no_markers,
            report,
        } => {
            let options = commands::RunOptions {
                dry_run,
                no_markers,
                report,
            };
            commands::run(&file, &overrides, options).await?;
        }
    }

    Ok(())
}
