//! Livestream URL resolution.

use std::future::Future;
use std::process::Stdio;

use log::debug;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::error::ResolutionError;

/// Turns a livestream page URL into a media URL that a decoder can open.
///
/// Resolved URLs expire; callers resolve again every cycle.
pub trait StreamResolver {
    fn resolve(&self, source: &str) -> impl Future<Output = Result<String, ResolutionError>>;
}

/// Shells out to `yt-dlp -g`.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    program: String,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl StreamResolver for YtDlpResolver {
    async fn resolve(&self, source: &str) -> Result<String, ResolutionError> {
        let mut command = Command::new(&self.program);
        command
            .args(["-f", "best", "-g", "--no-warnings", "--no-playlist"])
            .arg(source)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| ResolutionError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => return Err(ResolutionError::Timeout(self.timeout.as_secs())),
        };

        if !output.status.success() {
            return Err(ResolutionError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let url = first_url(&String::from_utf8_lossy(&output.stdout))
            .ok_or(ResolutionError::NoStreamUrl)?;
        debug!("resolved {source} to a {} byte media url", url.len());
        Ok(url)
    }
}

/// `-g` prints one URL per selected format; the first is the combined stream.
fn first_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
