//! Single-frame capture from a resolved media URL.

use std::future::Future;
use std::io::Cursor;
use std::process::Stdio;

use image::{ImageFormat, RgbImage};
use log::{debug, warn};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Duration};

use crate::error::CaptureError;

/// An RGB pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub const CHANNELS: u8 = 3;

    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn from_encoded(bytes: &[u8]) -> Result<Self, image::ImageError> {
        Ok(Self::from_rgb(image::load_from_memory(bytes)?.to_rgb8()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        Self::CHANNELS
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    pub fn as_rgb_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        self.image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}

pub trait FrameCapturer {
    fn capture(&self, media_url: &str) -> impl Future<Output = Result<Frame, CaptureError>>;
}

/// Grabs one frame through an `ffmpeg` child process.
#[derive(Debug, Clone)]
pub struct FfmpegCapturer {
    program: String,
    stabilization_delay: Duration,
    read_timeout: Duration,
}

impl FfmpegCapturer {
    pub fn new(program: impl Into<String>, stabilization_delay: Duration, read_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            stabilization_delay,
            read_timeout,
        }
    }

    fn open(&self, media_url: &str) -> Result<DecodeSession, CaptureError> {
        let child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(media_url)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(CaptureError::Open)?;
        Ok(DecodeSession { child: Some(child) })
    }
}

impl FrameCapturer for FfmpegCapturer {
    async fn capture(&self, media_url: &str) -> Result<Frame, CaptureError> {
        let mut session = self.open(media_url)?;
        sleep(self.stabilization_delay).await;

        let read = timeout(self.read_timeout, session.read_frame()).await;
        session.close().await;

        let bytes = match read {
            Ok(result) => result?,
            Err(_) => return Err(CaptureError::Timeout(self.read_timeout.as_secs())),
        };
        if bytes.is_empty() {
            return Err(CaptureError::NoFrame);
        }

        let frame = Frame::from_encoded(&bytes)?;
        debug!("captured {}x{} frame", frame.width(), frame.height());
        Ok(frame)
    }
}

/// An open decoder process. Killed on `close`, or on drop if a caller bails early.
struct DecodeSession {
    child: Option<Child>,
}

impl DecodeSession {
    async fn read_frame(&mut self) -> Result<Vec<u8>, CaptureError> {
        let stdout = self
            .child
            .as_mut()
            .and_then(|child| child.stdout.as_mut())
            .ok_or(CaptureError::NoFrame)?;
        let mut bytes = Vec::new();
        stdout
            .read_to_end(&mut bytes)
            .await
            .map_err(CaptureError::Read)?;
        Ok(bytes)
    }

    async fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        // ffmpeg normally exits on its own after one frame.
        if let Ok(None) = child.try_wait() {
            if let Err(err) = child.kill().await {
                warn!("failed to stop decode session: {err}");
            }
        } else if let Err(err) = child.wait().await {
            warn!("failed to reap decode session: {err}");
        }
    }
}
