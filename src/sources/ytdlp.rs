use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{validate_url, VideoSource};
use crate::stages::{QualityHint, StageError};

/// Video source backed by the yt-dlp command line tool.
pub struct YtDlpSource {
    yt_dlp_path: String,
}

impl YtDlpSource {
    pub fn new(yt_dlp_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
        }
    }
}

/// Map yt-dlp's stderr onto a classified failure.
pub(crate) fn classify_failure(stderr: &str) -> StageError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .unwrap_or(stderr)
        .trim()
        .to_string();

    if stderr.contains("Requested format is not available")
        || stderr.contains("No video formats found")
        || stderr.contains("no suitable formats")
    {
        StageError::NoStream(message)
    } else if stderr.contains("Unsupported URL") || stderr.contains("is not a valid URL") {
        StageError::Unsupported(message)
    } else if stderr.contains("HTTP Error 401") {
        StageError::from_status(401, message)
    } else if stderr.contains("HTTP Error 403")
        || stderr.contains("Private video")
        || stderr.contains("Sign in")
    {
        StageError::from_status(403, message)
    } else if stderr.contains("No space left on device") {
        StageError::Filesystem(std::io::Error::new(std::io::ErrorKind::Other, message))
    } else if stderr.contains("Permission denied") {
        StageError::Filesystem(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            message,
        ))
    } else {
        StageError::ToolFailed {
            tool: "yt-dlp".to_string(),
            message,
        }
    }
}

#[async_trait]
impl VideoSource for YtDlpSource {
    #[tracing::instrument(skip(self, quality, dest), fields(quality = quality.as_str()))]
    async fn fetch(
        &self,
        source: &str,
        quality: QualityHint,
        dest: &Path,
    ) -> Result<(), StageError> {
        tracing::debug!("Downloading {} with format {}", source, quality.format_selector());

        let result = Command::new(&self.yt_dlp_path)
            .arg("--format")
            .arg(quality.format_selector())
            .arg("--output")
            .arg(dest)
            .args([
                "--no-playlist",
                "--no-part",
                "--force-overwrites",
                "--quiet",
                "--no-warnings",
            ])
            .arg(source)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StageError::ToolNotFound(self.yt_dlp_path.clone()));
            }
            Err(e) => return Err(StageError::Filesystem(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        Ok(())
    }

    fn supports(&self, source: &str) -> bool {
        validate_url(source).is_ok()
    }

    fn platform_name(&self) -> &'static str {
        "yt-dlp"
    }
}
