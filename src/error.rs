//! Per-stage error types for one monitoring cycle.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("failed to launch resolver `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("resolver exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("resolver returned no playable url")]
    NoStreamUrl,

    #[error("resolver timed out after {0}s")]
    Timeout(u64),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("failed to open decode session: {0}")]
    Open(#[source] std::io::Error),

    #[error("failed to read frame: {0}")]
    Read(#[source] std::io::Error),

    #[error("stream produced no frame")]
    NoFrame,

    #[error("frame capture timed out after {0}s")]
    Timeout(u64),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("failed to launch detector `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("detector i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("detector exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("detector timed out after {0}s")]
    Timeout(u64),

    #[error("failed to encode frame for detector: {0}")]
    Encode(#[from] image::ImageError),

    #[error("detector output is not valid json: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("image {path} already exists")]
    ImageExists { path: String },

    #[error("failed to write image {path}: {source}")]
    ImageIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store operation failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Stage of a cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Resolving,
    Capturing,
    Detecting,
    Recording,
    Sleeping,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::Resolving => "resolving",
            CycleStage::Capturing => "capturing",
            CycleStage::Detecting => "detecting",
            CycleStage::Recording => "recording",
            CycleStage::Sleeping => "sleeping",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("stream resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("frame capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("detection failed: {0}")]
    Detection(#[from] DetectionError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl CycleError {
    /// The stage that was running when the cycle was abandoned.
    pub fn stage(&self) -> CycleStage {
        match self {
            CycleError::Resolution(_) => CycleStage::Resolving,
            CycleError::Capture(_) => CycleStage::Capturing,
            CycleError::Detection(_) => CycleStage::Detecting,
            CycleError::Persistence(_) => CycleStage::Recording,
        }
    }
}
