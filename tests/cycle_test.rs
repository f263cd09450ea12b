//! End-to-end cycle behaviour with in-process stand-ins for the stream,
//! decoder and model.

use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use image::RgbImage;
use storkwatch_lib::capture::{Frame, FrameCapturer};
use storkwatch_lib::db::Database;
use storkwatch_lib::detect::{BoundingBox, DetectionResult, Detector};
use storkwatch_lib::error::{
    CaptureError, CycleError, CycleStage, DetectionError, PersistenceError, ResolutionError,
};
use storkwatch_lib::monitor::{monitor_loop, Pipeline, Schedule};
use storkwatch_lib::recorder::Recorder;
use storkwatch_lib::stream::StreamResolver;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fails the first `failures` calls, then hands out a fixed URL.
struct FlakyResolver {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyResolver {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

impl StreamResolver for FlakyResolver {
    async fn resolve(&self, _source: &str) -> Result<String, ResolutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(ResolutionError::NoStreamUrl)
        } else {
            Ok("https://cdn.example/live.m3u8".into())
        }
    }
}

struct StillCapturer {
    fail: bool,
}

impl FrameCapturer for StillCapturer {
    async fn capture(&self, _media_url: &str) -> Result<Frame, CaptureError> {
        if self.fail {
            Err(CaptureError::NoFrame)
        } else {
            Ok(Frame::from_rgb(RgbImage::new(32, 24)))
        }
    }
}

struct FixedDetector {
    boxes: Vec<BoundingBox>,
    fail: bool,
}

impl FixedDetector {
    fn storks(n: usize) -> Self {
        let boxes = (0..n)
            .map(|i| BoundingBox {
                x1: i as f32,
                y1: 1.0,
                x2: i as f32 + 4.0,
                y2: 6.0,
                confidence: 0.9,
                class_id: 0,
            })
            .collect();
        Self { boxes, fail: false }
    }
}

impl Detector for FixedDetector {
    async fn predict(
        &self,
        _frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<DetectionResult, DetectionError> {
        if self.fail {
            return Err(DetectionError::Timeout(1));
        }
        Ok(DetectionResult::from_boxes(self.boxes.clone(), confidence_threshold))
    }
}

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 15)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

/// Advances one second per call so image names never collide.
fn ticking_clock() -> NaiveDateTime {
    static TICKS: AtomicI64 = AtomicI64::new(0);
    base_time() + ChronoDuration::seconds(TICKS.fetch_add(1, Ordering::SeqCst))
}

struct Harness {
    _dir: tempfile::TempDir,
    db: Database,
    recorder: Recorder,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
    let recorder = Recorder::new(db.clone(), dir.path().join("out"), ChronoDuration::hours(12)).unwrap();
    Harness {
        _dir: dir,
        db,
        recorder,
    }
}

fn image_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn successful_cycle_records_exactly_one_detection() {
    let h = harness();
    let pipeline = Pipeline::new(
        "https://www.youtube.com/watch?v=stork",
        0.5,
        FlakyResolver::new(0),
        StillCapturer { fail: false },
        FixedDetector::storks(3),
        h.recorder.clone(),
    )
    .with_clock(ticking_clock);

    let report = pipeline.run_cycle().await.unwrap();
    assert_eq!(report.detection.stork_count, 3);

    let rows = h.db.all_detections().await.unwrap();
    assert_eq!(rows.len(), 1);
    let image_path = rows[0].image_path.as_deref().unwrap();
    assert!(Path::new(image_path).is_file());
    assert!(image_path.contains("detection_20250615_"));
}

#[tokio::test]
async fn failure_at_any_stage_writes_nothing() {
    let h = harness();

    let resolve_fails = Pipeline::new(
        "stream",
        0.5,
        FlakyResolver::new(usize::MAX),
        StillCapturer { fail: false },
        FixedDetector::storks(1),
        h.recorder.clone(),
    );
    let capture_fails = Pipeline::new(
        "stream",
        0.5,
        FlakyResolver::new(0),
        StillCapturer { fail: true },
        FixedDetector::storks(1),
        h.recorder.clone(),
    );
    let detect_fails = Pipeline::new(
        "stream",
        0.5,
        FlakyResolver::new(0),
        StillCapturer { fail: false },
        FixedDetector {
            boxes: Vec::new(),
            fail: true,
        },
        h.recorder.clone(),
    );

    let err = resolve_fails.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Resolution(_)));
    assert_eq!(err.stage(), CycleStage::Resolving);

    let err = capture_fails.run_cycle().await.unwrap_err();
    assert_eq!(err.stage(), CycleStage::Capturing);

    let err = detect_fails.run_cycle().await.unwrap_err();
    assert_eq!(err.stage(), CycleStage::Detecting);

    assert_eq!(h.db.hot_count().await.unwrap(), 0);
    assert_eq!(image_count(h.recorder.output_dir()), 0);
}

#[tokio::test]
async fn store_rejection_fails_the_recording_stage() {
    let h = harness();
    h.db.execute(|conn| {
        conn.execute_batch(
            "CREATE TRIGGER reject_detections BEFORE INSERT ON detections
             BEGIN SELECT RAISE(ABORT, 'disk quota exceeded'); END;",
        )?;
        Ok(())
    })
    .await
    .unwrap();

    let pipeline = Pipeline::new(
        "stream",
        0.5,
        FlakyResolver::new(0),
        StillCapturer { fail: false },
        FixedDetector::storks(2),
        h.recorder.clone(),
    )
    .with_clock(ticking_clock);

    let err = pipeline.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Persistence(PersistenceError::Store(_))));
    assert_eq!(err.stage(), CycleStage::Recording);
    assert_eq!(h.db.hot_count().await.unwrap(), 0);
    // The image was written before the insert failed and stays behind.
    assert_eq!(image_count(h.recorder.output_dir()), 1);
}

#[tokio::test]
async fn loop_survives_repeated_resolution_failures() {
    let h = harness();
    let pipeline = Pipeline::new(
        "stream",
        0.5,
        FlakyResolver::new(2),
        StillCapturer { fail: false },
        FixedDetector::storks(2),
        h.recorder.clone(),
    )
    .with_clock(ticking_clock);

    let schedule = Schedule::every(Duration::from_millis(5)).with_max_cycles(2);
    let stats = monitor_loop(&pipeline, schedule, CancellationToken::new()).await;
    assert_eq!((stats.cycles, stats.recorded, stats.failed), (2, 0, 2));
    assert_eq!(h.db.hot_count().await.unwrap(), 0);

    // The resolver recovers; polling carries on with the same pipeline.
    let schedule = Schedule::every(Duration::from_millis(5)).with_max_cycles(1);
    let stats = monitor_loop(&pipeline, schedule, CancellationToken::new()).await;
    assert_eq!((stats.cycles, stats.recorded, stats.failed), (1, 1, 0));
    assert_eq!(h.db.hot_count().await.unwrap(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_the_sleep() {
    let h = harness();
    let pipeline = Pipeline::new(
        "stream",
        0.5,
        FlakyResolver::new(0),
        StillCapturer { fail: false },
        FixedDetector::storks(0),
        h.recorder.clone(),
    )
    .with_clock(ticking_clock);

    let token = CancellationToken::new();
    let canceller = token.clone();
    let schedule = Schedule::every(Duration::from_secs(3600));

    let (stats, _) = tokio::join!(monitor_loop(&pipeline, schedule, token), async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.recorded, 1);
    let status = h.db.current_status().await.unwrap().unwrap();
    assert_eq!(status.latest.stork_count, 0);
    assert_eq!(status.status.as_str(), "Empty");
}

#[tokio::test]
async fn cancelled_before_start_runs_no_cycles() {
    let h = harness();
    let pipeline = Pipeline::new(
        "stream",
        0.5,
        FlakyResolver::new(0),
        StillCapturer { fail: false },
        FixedDetector::storks(1),
        h.recorder.clone(),
    );

    let token = CancellationToken::new();
    token.cancel();
    let stats = monitor_loop(&pipeline, Schedule::every(Duration::from_secs(1)), token).await;
    assert_eq!(stats.cycles, 0);
    assert_eq!(h.db.hot_count().await.unwrap(), 0);
}
