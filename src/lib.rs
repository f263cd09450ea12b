pub mod capture;
mod commands;
pub mod db;
pub mod detect;
pub mod error;
pub mod monitor;
pub mod recorder;
pub mod settings;
pub mod stream;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use monitor::Schedule;
use settings::Config;

#[derive(Debug, Parser)]
#[command(name = "storkwatch", version, about = "Counts storks on a livestream")]
struct Cli {
    /// JSON config file; `STORKWATCH_*` variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Poll the stream until interrupted.
    Run,
    /// Run a single cycle and exit.
    Once,
    /// Print the latest detection and busiest hour.
    Status,
    /// Dump stored detections as JSON.
    Export {
        /// Dump the archive instead of the hot table.
        #[arg(long)]
        archive: bool,
    },
    /// Move rows past the retention window into the archive.
    Archive,
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        match cli.command.unwrap_or(CliCommand::Run) {
            CliCommand::Run => {
                log::info!("storkwatch starting up...");
                commands::run_monitor(&config, Schedule::every(config.poll_interval())).await?;
            }
            CliCommand::Once => {
                let stats = commands::run_monitor(&config, Schedule::once()).await?;
                if stats.recorded == 0 {
                    anyhow::bail!("cycle did not record a detection");
                }
            }
            CliCommand::Status => commands::print_status(&config).await?,
            CliCommand::Export { archive } => commands::export(&config, archive).await?,
            CliCommand::Archive => commands::archive_now(&config).await?,
        }
        Ok::<(), anyhow::Error>(())
    })
}
