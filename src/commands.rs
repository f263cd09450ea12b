use std::io::Write;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::capture::FfmpegCapturer;
use crate::db::Database;
use crate::detect::CommandDetector;
use crate::monitor::{local_now, monitor_loop, MonitorStats, Pipeline, Schedule};
use crate::recorder::Recorder;
use crate::settings::Config;
use crate::stream::YtDlpResolver;

fn open_recorder(config: &Config) -> Result<Recorder> {
    let db = Database::new(config.database_path.clone())?;
    Recorder::new(db, config.output_dir.clone(), config.retention())
        .context("failed to prepare recorder")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("failed to serialize output")?;
    writeln!(stdout)?;
    Ok(())
}

/// 128 + SIGINT, as shells report an interrupted process.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Forwards every Ctrl-C to the returned channel.
fn spawn_ctrl_c_forwarder() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// First interrupt cancels `token` for a graceful stop. Resolves to `true` on
/// a second interrupt, meaning the caller should exit without waiting.
async fn watch_interrupts(mut interrupts: mpsc::UnboundedReceiver<()>, token: CancellationToken) -> bool {
    if interrupts.recv().await.is_none() {
        return false;
    }
    info!("Interrupt received; stopping after the current step (Ctrl-C again to exit now)");
    token.cancel();

    if interrupts.recv().await.is_none() {
        return false;
    }
    warn!("Second interrupt received; exiting immediately");
    true
}

/// Builds the production pipeline and polls until Ctrl-C (or `schedule` ends).
pub async fn run_monitor(config: &Config, schedule: Schedule) -> Result<MonitorStats> {
    let recorder = open_recorder(config)?;
    let pipeline = Pipeline::new(
        config.stream_url.clone(),
        config.confidence_threshold,
        YtDlpResolver::new(config.ytdlp_path.clone(), config.stage_timeout()),
        FfmpegCapturer::new(
            config.ffmpeg_path.clone(),
            config.stabilization_delay(),
            config.stage_timeout(),
        ),
        CommandDetector::new(config.detector_command.clone(), config.stage_timeout()),
        recorder,
    );

    let cancel_token = CancellationToken::new();
    let interrupts = watch_interrupts(spawn_ctrl_c_forwarder(), cancel_token.clone());
    tokio::spawn(async move {
        if interrupts.await {
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    info!(
        "Watching {} every {}s (confidence >= {}, retention {}h)",
        config.stream_url, config.poll_interval_secs, config.confidence_threshold, config.retention_hours
    );
    let stats = monitor_loop(&pipeline, schedule, cancel_token).await;
    Ok(stats)
}

pub async fn print_status(config: &Config) -> Result<()> {
    let db = Database::new(config.database_path.clone())?;
    print_json(&db.current_status().await?)
}

pub async fn export(config: &Config, archive: bool) -> Result<()> {
    let db = Database::new(config.database_path.clone())?;
    if archive {
        print_json(&db.archived_detections().await?)
    } else {
        print_json(&db.all_detections().await?)
    }
}

pub async fn archive_now(config: &Config) -> Result<()> {
    let recorder = open_recorder(config)?;
    let summary = recorder.archive(local_now()).await?;
    print_json(&summary)
}
