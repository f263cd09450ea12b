use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use tokio::time::Instant;

use crate::capture::FrameCapturer;
use crate::db::{ArchiveSummary, Detection};
use crate::detect::Detector;
use crate::error::{CycleError, CycleStage};
use crate::recorder::Recorder;
use crate::stream::StreamResolver;

pub type Clock = fn() -> NaiveDateTime;

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub detection: Detection,
    pub archived: ArchiveSummary,
}

/// The four stages of one cycle, wired to concrete collaborators.
pub struct Pipeline<R, C, D> {
    stream_url: String,
    confidence_threshold: f32,
    resolver: R,
    capturer: C,
    detector: D,
    recorder: Recorder,
    clock: Clock,
}

impl<R, C, D> Pipeline<R, C, D>
where
    R: StreamResolver,
    C: FrameCapturer,
    D: Detector,
{
    pub fn new(
        stream_url: impl Into<String>,
        confidence_threshold: f32,
        resolver: R,
        capturer: C,
        detector: D,
        recorder: Recorder,
    ) -> Self {
        Self {
            stream_url: stream_url.into(),
            confidence_threshold,
            resolver,
            capturer,
            detector,
            recorder,
            clock: local_now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Runs resolve → capture → detect → record once.
    ///
    /// Nothing is written unless every stage before recording succeeds.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cycle_start = Instant::now();

        enter(CycleStage::Resolving);
        let media_url = self.resolver.resolve(&self.stream_url).await?;

        enter(CycleStage::Capturing);
        let frame = self.capturer.capture(&media_url).await?;
        let captured_at = (self.clock)();

        enter(CycleStage::Detecting);
        let detect_start = Instant::now();
        let result = self
            .detector
            .predict(&frame, self.confidence_threshold)
            .await?;
        let annotated = self.detector.annotate(&frame, &result);
        debug!(
            "detector found {} boxes in {}ms",
            result.count,
            detect_start.elapsed().as_millis()
        );

        enter(CycleStage::Recording);
        let detection = self
            .recorder
            .persist(captured_at, result.count, &annotated)
            .await?;

        // Housekeeping: the record is already committed, so a failed archive
        // pass is retried next cycle instead of failing this one.
        let archived = match self.recorder.archive((self.clock)()).await {
            Ok(summary) => summary,
            Err(err) => {
                warn!("archive pass failed: {err}");
                ArchiveSummary::default()
            }
        };

        info!(
            "Cycle complete: {} storks, {}x{} frame, {}ms",
            detection.stork_count,
            frame.width(),
            frame.height(),
            cycle_start.elapsed().as_millis()
        );

        Ok(CycleReport {
            detection,
            archived,
        })
    }
}

fn enter(stage: CycleStage) {
    debug!("cycle stage -> {stage}");
}
