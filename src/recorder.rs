use std::fs::OpenOptions;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use image::codecs::jpeg::JpegEncoder;
use log::{info, warn};

use crate::capture::Frame;
use crate::db::{helpers::truncate_to_second, ArchiveSummary, Database, Detection, NewDetection};
use crate::error::PersistenceError;

pub const IMAGE_EXTENSION: &str = "jpg";

/// `detection_<YYYYMMDD_HHMMSS>.jpg`; unique as long as captures are a second apart.
pub fn image_file_name(captured_at: &NaiveDateTime) -> String {
    format!(
        "detection_{}.{IMAGE_EXTENSION}",
        captured_at.format("%Y%m%d_%H%M%S")
    )
}

/// Sole writer of detection records and annotated images.
#[derive(Clone)]
pub struct Recorder {
    db: Database,
    output_dir: PathBuf,
    retention: chrono::Duration,
}

impl Recorder {
    pub fn new(db: Database, output_dir: PathBuf, retention: chrono::Duration) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(&output_dir).map_err(|source| PersistenceError::OutputDir {
            path: output_dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            db,
            output_dir,
            retention,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Writes the image, then the record. No record is inserted unless the
    /// image is on disk; a failed insert leaves the image behind.
    pub async fn persist(
        &self,
        captured_at: NaiveDateTime,
        stork_count: u32,
        annotated: &Frame,
    ) -> Result<Detection, PersistenceError> {
        let captured_at = truncate_to_second(captured_at);
        let path = self.output_dir.join(image_file_name(&captured_at));
        let image_path = path.to_string_lossy().into_owned();

        let frame = annotated.clone();
        let write_path = path.clone();
        tokio::task::spawn_blocking(move || write_new_image(&write_path, &frame))
            .await
            .map_err(|err| PersistenceError::Store(anyhow::anyhow!("image writer join failed: {err}")))??;

        let record = NewDetection {
            timestamp: captured_at,
            stork_count,
            image_path: Some(image_path.clone()),
        };

        match self.db.insert_detection(&record).await {
            Ok(stored) => {
                info!("Recorded {} storks at {} ({})", stork_count, captured_at, image_path);
                Ok(stored)
            }
            Err(err) => {
                warn!("Insert failed; image {} is now orphaned", image_path);
                Err(PersistenceError::Store(err))
            }
        }
    }

    /// Moves rows older than the retention window out of the hot table.
    pub async fn archive(&self, now: NaiveDateTime) -> Result<ArchiveSummary, PersistenceError> {
        let cutoff = now - self.retention;
        let summary = self.db.archive_older_than(cutoff, truncate_to_second(now)).await?;
        if summary.moved > 0 {
            info!("Archived {} detections older than {}", summary.moved, cutoff);
        }
        Ok(summary)
    }
}

/// Creates `path` exclusively; an existing file is never overwritten.
fn write_new_image(path: &Path, frame: &Frame) -> Result<(), PersistenceError> {
    let display = || path.display().to_string();
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| match source.kind() {
            ErrorKind::AlreadyExists => PersistenceError::ImageExists { path: display() },
            _ => PersistenceError::ImageIo {
                path: display(),
                source,
            },
        })?;

    let mut writer = BufWriter::new(file);
    let encoded = frame
        .as_rgb()
        .write_with_encoder(JpegEncoder::new(&mut writer))
        .map_err(|source| PersistenceError::Image {
            path: display(),
            source,
        })
        .and_then(|()| {
            writer.flush().map_err(|source| PersistenceError::ImageIo {
                path: display(),
                source,
            })
        });
    if let Err(err) = encoded {
        drop(writer);
        // A half-written file would otherwise block the name.
        if let Err(remove_err) = std::fs::remove_file(path) {
            warn!("failed to remove partial image {}: {remove_err}", path.display());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use image::{Rgb, RgbImage};

    fn captured_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 4)
            .unwrap()
            .and_hms_milli_opt(18, 30, 5, 420)
            .unwrap()
    }

    #[test]
    fn file_name_uses_second_resolution_timestamp() {
        assert_eq!(image_file_name(&captured_at()), "detection_20250704_183005.jpg");
    }

    #[tokio::test]
    async fn persist_writes_image_before_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        let recorder = Recorder::new(db.clone(), dir.path().join("out"), Duration::hours(12)).unwrap();

        let frame = Frame::from_rgb(RgbImage::new(16, 16));
        let stored = recorder.persist(captured_at(), 3, &frame).await.unwrap();

        let path = stored.image_path.clone().unwrap();
        assert!(Path::new(&path).is_file());
        assert!(path.ends_with("detection_20250704_183005.jpg"));
        assert_eq!(stored.timestamp, truncate_to_second(captured_at()));
        assert_eq!(db.all_detections().await.unwrap(), vec![stored]);
    }

    #[tokio::test]
    async fn same_second_capture_keeps_first_image_and_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        let recorder = Recorder::new(db.clone(), dir.path().join("out"), Duration::hours(12)).unwrap();

        // Repeated wall-clock second, as during a DST fall-back hour.
        let at = NaiveDate::from_ymd_opt(2025, 10, 26)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let black = Frame::from_rgb(RgbImage::new(16, 16));
        let white = Frame::from_rgb(RgbImage::from_pixel(16, 16, Rgb([255, 255, 255])));

        let first = recorder.persist(at, 1, &black).await.unwrap();
        let path = first.image_path.clone().unwrap();
        let bytes_before = std::fs::read(&path).unwrap();

        let err = recorder.persist(at, 4, &white).await.unwrap_err();
        assert!(matches!(err, PersistenceError::ImageExists { .. }));

        assert_eq!(std::fs::read(&path).unwrap(), bytes_before);
        assert_eq!(db.all_detections().await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn unwritable_output_dir_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        let out = dir.path().join("out");
        let recorder = Recorder::new(db.clone(), out.clone(), Duration::hours(12)).unwrap();
        std::fs::remove_dir_all(&out).unwrap();

        let frame = Frame::from_rgb(RgbImage::new(16, 16));
        let err = recorder.persist(captured_at(), 1, &frame).await.unwrap_err();
        assert!(matches!(err, PersistenceError::ImageIo { .. }));
        assert_eq!(db.hot_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_insert_leaves_image_orphaned() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        let out = dir.path().join("out");
        let recorder = Recorder::new(db.clone(), out.clone(), Duration::hours(12)).unwrap();
        db.execute(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_detections BEFORE INSERT ON detections
                 BEGIN SELECT RAISE(ABORT, 'store rejected insert'); END;",
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let frame = Frame::from_rgb(RgbImage::new(16, 16));
        let err = recorder.persist(captured_at(), 2, &frame).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Store(_)));

        assert!(out.join(image_file_name(&captured_at())).is_file());
        assert_eq!(db.hot_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn archive_uses_retention_window() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("store.sqlite3")).unwrap();
        let recorder = Recorder::new(db.clone(), dir.path().join("out"), Duration::hours(12)).unwrap();

        let now = truncate_to_second(captured_at());
        for hours in [20, 13, 1] {
            db.insert_detection(&NewDetection {
                timestamp: now - Duration::hours(hours),
                stork_count: 1,
                image_path: None,
            })
            .await
            .unwrap();
        }

        assert_eq!(recorder.archive(now).await.unwrap().moved, 2);
        assert_eq!(recorder.archive(now).await.unwrap().moved, 0);
        assert_eq!(db.hot_count().await.unwrap(), 1);
    }
}
