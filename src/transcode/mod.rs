use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::stages::{AudioCodec, StageError};

/// Isolates the audio track of a media file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn extract(&self, input: &Path, codec: AudioCodec, dest: &Path)
        -> Result<(), StageError>;
}

/// Audio extraction through an ffmpeg subprocess.
pub struct FfmpegTranscoder {
    ffmpeg_path: String,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Codec and muxer arguments for each target.
    fn codec_args(codec: AudioCodec) -> &'static [&'static str] {
        match codec {
            AudioCodec::Mp3 => &["-acodec", "libmp3lame", "-ab", "128k", "-ar", "44100", "-f", "mp3"],
            AudioCodec::M4a => &["-acodec", "aac", "-ab", "128k", "-f", "ipod"],
            // Small mono PCM keeps uploads under API limits
            AudioCodec::Wav => &["-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-f", "wav"],
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// Map ffmpeg's stderr onto a classified failure.
pub(crate) fn classify_failure(stderr: &str) -> StageError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("ffmpeg exited with an error")
        .trim()
        .to_string();

    if stderr.contains("matches no streams")
        || stderr.contains("does not contain any stream")
        || stderr.contains("Output file is empty")
    {
        StageError::NoStream(format!("no audio track: {}", message))
    } else if stderr.contains("No space left on device") {
        StageError::Filesystem(std::io::Error::new(std::io::ErrorKind::Other, message))
    } else if stderr.contains("Permission denied") {
        StageError::Filesystem(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            message,
        ))
    } else {
        StageError::ToolFailed {
            tool: "ffmpeg".to_string(),
            message,
        }
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    #[tracing::instrument(skip(self, input, dest), fields(input = %input.display()))]
    async fn extract(
        &self,
        input: &Path,
        codec: AudioCodec,
        dest: &Path,
    ) -> Result<(), StageError> {
        if !input.is_file() {
            return Err(StageError::MissingInput(input.to_path_buf()));
        }

        tracing::debug!("Extracting {} audio from {}", codec.as_str(), input.display());

        let result = Command::new(&self.ffmpeg_path)
            .arg("-i")
            .arg(input)
            .args(["-map", "0:a:0", "-vn"])
            .args(Self::codec_args(codec))
            .args(["-y", "-loglevel", "error"])
            .arg(dest)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => Ok(()),
            Ok(out) => Err(classify_failure(&String::from_utf8_lossy(&out.stderr))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StageError::ToolNotFound(self.ffmpeg_path.clone()))
            }
            Err(e) => Err(StageError::Filesystem(e)),
        }
    }
}
