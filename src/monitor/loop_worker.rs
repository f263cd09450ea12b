use log::{error, info, warn};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::capture::FrameCapturer;
use crate::detect::Detector;
use crate::error::{CycleError, CycleStage};
use crate::stream::StreamResolver;

use super::pipeline::Pipeline;

/// Fixed-interval schedule. There is no backoff: a failed cycle waits the
/// same interval as a successful one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    /// Stop after this many cycles; `None` runs until cancelled.
    pub max_cycles: Option<u64>,
}

impl Schedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_cycles: None,
        }
    }

    pub fn once() -> Self {
        Self {
            interval: Duration::ZERO,
            max_cycles: Some(1),
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub cycles: u64,
    pub recorded: u64,
    pub failed: u64,
}

/// Runs cycles back to back with `schedule.interval` of sleep in between.
///
/// Cancellation is honoured during the sleep; a cycle already in flight is
/// allowed to finish so its capture session is released normally.
pub async fn monitor_loop<R, C, D>(
    pipeline: &Pipeline<R, C, D>,
    schedule: Schedule,
    cancel_token: CancellationToken,
) -> MonitorStats
where
    R: StreamResolver,
    C: FrameCapturer,
    D: Detector,
{
    let mut stats = MonitorStats::default();

    while !cancel_token.is_cancelled() {
        stats.cycles += 1;
        match pipeline.run_cycle().await {
            Ok(report) => {
                stats.recorded += 1;
                info!(
                    "cycle {} recorded detection #{} ({} archived)",
                    stats.cycles, report.detection.id, report.archived.moved
                );
            }
            Err(err) => {
                stats.failed += 1;
                log_cycle_failure(stats.cycles, &err);
            }
        }

        if schedule
            .max_cycles
            .is_some_and(|max| stats.cycles >= max)
        {
            break;
        }

        info!(
            "{} for {}s before the next cycle",
            CycleStage::Sleeping,
            schedule.interval.as_secs()
        );
        tokio::select! {
            _ = tokio::time::sleep(schedule.interval) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    info!(
        "monitor loop stopped after {} cycles ({} recorded, {} failed)",
        stats.cycles, stats.recorded, stats.failed
    );
    stats
}

fn log_cycle_failure(cycle: u64, err: &CycleError) {
    match err {
        CycleError::Persistence(_) => {
            error!("cycle {cycle} abandoned while {}: {err}", err.stage())
        }
        _ => warn!("cycle {cycle} abandoned while {}: {err}", err.stage()),
    }
}
