//! Detection model boundary.
//!
//! The model itself is external. `CommandDetector` talks to it through a child
//! process: the frame goes in on stdin as PNG and a JSON array of boxes comes
//! back on stdout, e.g.
//! `[{"x1": 10, "y1": 20, "x2": 64, "y2": 90, "confidence": 0.82, "class_id": 0}]`.

use std::future::Future;
use std::process::Stdio;

use image::Rgb;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::capture::Frame;
use crate::error::DetectionError;

const BOX_COLOR: Rgb<u8> = Rgb([255, 64, 32]);
const BOX_THICKNESS: u32 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    #[serde(default)]
    pub class_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub boxes: Vec<BoundingBox>,
    pub count: u32,
}

impl DetectionResult {
    /// Keeps boxes at or above `confidence_threshold`.
    pub fn from_boxes(boxes: Vec<BoundingBox>, confidence_threshold: f32) -> Self {
        let boxes: Vec<BoundingBox> = boxes
            .into_iter()
            .filter(|b| b.confidence >= confidence_threshold)
            .collect();
        Self {
            count: boxes.len() as u32,
            boxes,
        }
    }
}

pub trait Detector {
    fn predict(
        &self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> impl Future<Output = Result<DetectionResult, DetectionError>>;

    /// Copy of `frame` with every box outlined.
    fn annotate(&self, frame: &Frame, result: &DetectionResult) -> Frame {
        draw_boxes(frame, &result.boxes)
    }
}

pub fn draw_boxes(frame: &Frame, boxes: &[BoundingBox]) -> Frame {
    let mut annotated = frame.clone();
    let image = annotated.as_rgb_mut();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return annotated;
    }

    let clamp = |value: f32, max: u32| -> u32 { value.max(0.0).min((max - 1) as f32) as u32 };

    for b in boxes {
        let (x1, x2) = (clamp(b.x1.min(b.x2), width), clamp(b.x1.max(b.x2), width));
        let (y1, y2) = (clamp(b.y1.min(b.y2), height), clamp(b.y1.max(b.y2), height));

        for t in 0..BOX_THICKNESS {
            let top = (y1 + t).min(y2);
            let bottom = y2.saturating_sub(t).max(y1);
            let left = (x1 + t).min(x2);
            let right = x2.saturating_sub(t).max(x1);
            for x in x1..=x2 {
                image.put_pixel(x, top, BOX_COLOR);
                image.put_pixel(x, bottom, BOX_COLOR);
            }
            for y in y1..=y2 {
                image.put_pixel(left, y, BOX_COLOR);
                image.put_pixel(right, y, BOX_COLOR);
            }
        }
    }

    annotated
}

/// Runs an external inference helper once per frame.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    async fn run(&self, png: Vec<u8>, confidence_threshold: f32) -> Result<Vec<u8>, DetectionError> {
        let (program, args) = self.command.split_first().ok_or_else(|| DetectionError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty detector command"),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .arg("--conf")
            .arg(confidence_threshold.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DetectionError::Spawn {
                program: program.clone(),
                source,
            })?;

        // stdin is fed while stdout and stderr drain, so a helper that talks
        // before reading the whole image cannot fill a pipe and stall.
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => {
                    let written = stdin.write_all(&png).await;
                    // Closing stdin tells the helper the image is complete.
                    drop(stdin);
                    written
                }
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());

        let output = output?;
        if !output.status.success() {
            return Err(DetectionError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written?;
        Ok(output.stdout)
    }
}

impl Detector for CommandDetector {
    async fn predict(
        &self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<DetectionResult, DetectionError> {
        let png = frame.to_png()?;
        let stdout = timeout(self.timeout, self.run(png, confidence_threshold))
            .await
            .map_err(|_| DetectionError::Timeout(self.timeout.as_secs()))??;
        let boxes: Vec<BoundingBox> = serde_json::from_slice(&stdout)?;
        Ok(DetectionResult::from_boxes(boxes, confidence_threshold))
    }
}
