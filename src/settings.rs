use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

const ENV_PREFIX: &str = "STORKWATCH_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream_url: String,
    pub confidence_threshold: f32,
    pub poll_interval_secs: u64,
    pub stabilization_delay_secs: u64,
    pub output_dir: PathBuf,
    pub database_path: PathBuf,
    pub retention_hours: u64,
    /// Inference helper; the frame arrives on stdin as PNG.
    pub detector_command: Vec<String>,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub stage_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_url: "https://www.youtube.com/watch?v=i_jiHI3k8ag".into(),
            confidence_threshold: 0.5,
            poll_interval_secs: 60,
            stabilization_delay_secs: 2,
            output_dir: PathBuf::from("runs/detect/realtime"),
            database_path: PathBuf::from("detections.sqlite3"),
            retention_hours: 12,
            detector_command: vec![
                "python3".into(),
                "scripts/detect.py".into(),
                "--weights".into(),
                "runs/detect/stork_experiment_152/weights/best.pt".into(),
            ],
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),
            stage_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Reads the optional JSON file, applies `STORKWATCH_*` overrides, then validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse config {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("STREAM_URL") {
            self.stream_url = value;
        }
        if let Some(value) = lookup("CONFIDENCE") {
            self.confidence_threshold = value
                .parse()
                .with_context(|| format!("invalid {ENV_PREFIX}CONFIDENCE '{value}'"))?;
        }
        if let Some(value) = lookup("INTERVAL_SECS") {
            self.poll_interval_secs = value
                .parse()
                .with_context(|| format!("invalid {ENV_PREFIX}INTERVAL_SECS '{value}'"))?;
        }
        if let Some(value) = lookup("RETENTION_HOURS") {
            self.retention_hours = value
                .parse()
                .with_context(|| format!("invalid {ENV_PREFIX}RETENTION_HOURS '{value}'"))?;
        }
        if let Some(value) = lookup("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("DATABASE") {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("DETECTOR") {
            self.detector_command = value.split_whitespace().map(str::to_string).collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream_url.trim().is_empty() {
            bail!("stream_url must not be empty");
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            bail!(
                "confidence_threshold must be in (0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.retention_hours == 0 {
            bail!("retention_hours must be greater than zero");
        }
        if self.detector_command.is_empty() {
            bail!("detector_command must name a program");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_secs(self.stabilization_delay_secs)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }
}
