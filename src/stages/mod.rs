use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod extract;
pub mod fetch;
pub mod generate;
pub mod transcribe;

pub use extract::ExtractAudioStage;
pub use fetch::FetchStage;
pub use generate::{DocumentStyle, GenerateStage};
pub use transcribe::TranscribeStage;

use crate::artifacts::{Artifact, ArtifactKind, StoreError};
use crate::job::{Credentials, Job};

/// The four pipeline steps, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    Fetch,
    ExtractAudio,
    Transcribe,
    Generate,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Fetch,
        StageKind::ExtractAudio,
        StageKind::Transcribe,
        StageKind::Generate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Fetch => "fetch",
            StageKind::ExtractAudio => "extract-audio",
            StageKind::Transcribe => "transcribe",
            StageKind::Generate => "generate",
        }
    }

    /// Kind of artifact this stage produces.
    pub fn output_kind(&self) -> ArtifactKind {
        match self {
            StageKind::Fetch => ArtifactKind::RawVideo,
            StageKind::ExtractAudio => ArtifactKind::RawAudio,
            StageKind::Transcribe => ArtifactKind::TranscriptText,
            StageKind::Generate => ArtifactKind::GeneratedDocument,
        }
    }

    /// Kind of artifact this stage consumes; `None` means it starts from the job.
    pub fn input_kind(&self) -> Option<ArtifactKind> {
        match self {
            StageKind::Fetch => None,
            StageKind::ExtractAudio => Some(ArtifactKind::RawVideo),
            StageKind::Transcribe => Some(ArtifactKind::RawAudio),
            StageKind::Generate => Some(ArtifactKind::TranscriptText),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download quality requested from the video source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityHint {
    Best,
    Worst,
    /// Alternate container type, for hosts whose default stream is broken.
    Alternate,
}

impl QualityHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityHint::Best => "best",
            QualityHint::Worst => "worst",
            QualityHint::Alternate => "alternate",
        }
    }

    /// yt-dlp `--format` selector for this hint.
    pub fn format_selector(&self) -> &'static str {
        match self {
            QualityHint::Best => "best[ext=mp4]/best",
            QualityHint::Worst => "worst[ext=mp4]/worst",
            QualityHint::Alternate => "best[ext=webm]/bestaudio[ext=webm]/bestaudio",
        }
    }
}

/// Audio codec requested from the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
    M4a,
    Wav,
}

impl AudioCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "mp3",
            AudioCodec::M4a => "m4a",
            AudioCodec::Wav => "wav",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "mp3" => Some(AudioCodec::Mp3),
            "m4a" | "aac" | "mp4" => Some(AudioCodec::M4a),
            "wav" => Some(AudioCodec::Wav),
            _ => None,
        }
    }

    /// Get MIME type for the codec
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioCodec::Mp3 => "audio/mpeg",
            AudioCodec::M4a => "audio/mp4",
            AudioCodec::Wav => "audio/wav",
        }
    }
}

/// Parameters of one attempt. Fallback chains are sequences of these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<AudioCodec>,
}

impl StageOptions {
    pub fn quality(quality: QualityHint) -> Self {
        Self {
            quality: Some(quality),
            codec: None,
        }
    }

    pub fn codec(codec: AudioCodec) -> Self {
        Self {
            quality: None,
            codec: Some(codec),
        }
    }
}

impl fmt::Display for StageOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.quality, self.codec) {
            (Some(q), Some(c)) => write!(f, "quality={} codec={}", q.as_str(), c.as_str()),
            (Some(q), None) => write!(f, "quality={}", q.as_str()),
            (None, Some(c)) => write!(f, "codec={}", c.as_str()),
            (None, None) => f.write_str("default"),
        }
    }
}

/// Failure raised by a stage or its collaborator, before classification.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Attempt timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("No usable stream: {0}")]
    NoStream(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Produced {0} artifact is empty")]
    EmptyArtifact(ArtifactKind),

    #[error("Expected {0} artifact was not produced")]
    MissingOutput(ArtifactKind),

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("Input file does not exist: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Unsupported source: {0}")]
    Unsupported(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("Cancelled by caller")]
    Cancelled,
}

impl StageError {
    /// Error for a non-success HTTP response.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        StageError::Http {
            status,
            message: message.into(),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, StageError::Http { status: 401 | 403, .. })
    }

    /// Whether the failure may go away on another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StageError::Network(_)
            | StageError::Timeout(_)
            | StageError::NoStream(_)
            | StageError::MalformedResponse(_)
            | StageError::EmptyArtifact(_)
            | StageError::MissingOutput(_)
            | StageError::ToolFailed { .. } => true,
            StageError::Http { status, .. } => match status {
                429 => true,
                400..=499 => false,
                _ => true,
            },
            StageError::ToolNotFound(_)
            | StageError::MissingInput(_)
            | StageError::Filesystem(_)
            | StageError::Unsupported(_)
            | StageError::ContractViolation(_)
            | StageError::Cancelled => false,
        }
    }

    /// Whether the next attempt should move down the fallback chain
    /// instead of repeating the same options.
    pub fn wants_fallback(&self) -> bool {
        matches!(self, StageError::NoStream(_))
    }
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Empty { kind, .. } => StageError::EmptyArtifact(kind),
            StoreError::Missing { kind, .. } => StageError::MissingOutput(kind),
            StoreError::Io { source, .. } => StageError::Filesystem(source),
        }
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StageError::MalformedResponse(err.to_string())
        } else if let Some(status) = err.status() {
            StageError::from_status(status.as_u16(), err.to_string())
        } else {
            StageError::Network(err.to_string())
        }
    }
}

/// Classified outcome of one stage attempt.
#[derive(Debug)]
pub enum StageResult {
    Success(Artifact),
    RetryableFailure(StageError),
    FatalFailure(StageError),
}

impl StageResult {
    pub fn from_error(err: StageError) -> Self {
        if err.is_retryable() {
            StageResult::RetryableFailure(err)
        } else {
            StageResult::FatalFailure(err)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success(_))
    }
}

/// What a stage reads: the job itself (Fetch) or the previous artifact.
#[derive(Debug, Clone, Copy)]
pub enum StageInput<'a> {
    Job(&'a Job),
    Artifact(&'a Artifact),
}

impl<'a> StageInput<'a> {
    pub fn job(&self) -> Result<&'a Job, StageError> {
        match self {
            StageInput::Job(job) => Ok(job),
            StageInput::Artifact(artifact) => Err(StageError::ContractViolation(format!(
                "expected the job reference, got a {} artifact",
                artifact.kind
            ))),
        }
    }

    pub fn artifact(&self, expected: ArtifactKind) -> Result<&'a Artifact, StageError> {
        match self {
            StageInput::Artifact(artifact) if artifact.kind == expected => Ok(artifact),
            StageInput::Artifact(artifact) => Err(StageError::ContractViolation(format!(
                "expected a {} artifact, got {}",
                expected, artifact.kind
            ))),
            StageInput::Job(_) => Err(StageError::ContractViolation(format!(
                "expected a {} artifact, got the job reference",
                expected
            ))),
        }
    }
}

/// Per-attempt context: everything a stage needs besides its input.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub credentials: &'a Credentials,
    pub options: &'a StageOptions,
    pub style: DocumentStyle,
    pub language: Option<&'a str>,
}

/// Extra facts a stage reports about what it wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    pub format: Option<String>,
}

impl StageOutput {
    pub fn with_format(format: impl Into<String>) -> Self {
        Self {
            format: Some(format.into()),
        }
    }
}

/// Uniform execution envelope around one unit of transformation.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Run one attempt, writing the result to `output`.
    async fn execute(
        &self,
        input: StageInput<'_>,
        ctx: &StageContext<'_>,
        output: &Path,
    ) -> Result<StageOutput, StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classification() {
        assert!(StageError::Network("reset".into()).is_retryable());
        assert!(StageError::Timeout(Duration::from_secs(3)).is_retryable());
        assert!(StageError::from_status(503, "unavailable").is_retryable());
        assert!(StageError::from_status(429, "slow down").is_retryable());
        assert!(!StageError::from_status(401, "bad key").is_retryable());
        assert!(StageError::from_status(403, "forbidden").is_auth());
        assert!(!StageError::from_status(404, "gone").is_retryable());
        assert!(StageError::MalformedResponse("{".into()).is_retryable());
        assert!(StageError::EmptyArtifact(ArtifactKind::RawAudio).is_retryable());
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(!StageError::Filesystem(denied).is_retryable());
        assert!(!StageError::MissingInput(PathBuf::from("/nope")).is_retryable());
        assert!(!StageError::Cancelled.is_retryable());
    }

    #[test]
    fn test_only_missing_streams_request_fallback() {
        assert!(StageError::NoStream("Requested format is not available".into()).wants_fallback());
        assert!(!StageError::Network("reset".into()).wants_fallback());
        assert!(!StageError::EmptyArtifact(ArtifactKind::RawVideo).wants_fallback());
    }

    #[test]
    fn test_store_errors_map_to_stage_errors() {
        let empty = StoreError::Empty {
            kind: ArtifactKind::RawAudio,
            path: PathBuf::from("x"),
        };
        assert!(matches!(
            StageError::from(empty),
            StageError::EmptyArtifact(ArtifactKind::RawAudio)
        ));
        assert!(matches!(
            StageResult::from_error(StageError::ContractViolation("x".into())),
            StageResult::FatalFailure(_)
        ));
    }

    #[test]
    fn test_stage_order_and_kinds_chain() {
        for pair in StageKind::ALL.windows(2) {
            assert_eq!(pair[1].input_kind(), Some(pair[0].output_kind()));
        }
        assert_eq!(StageKind::Fetch.input_kind(), None);
    }

    #[test]
    fn test_options_display() {
        assert_eq!(StageOptions::quality(QualityHint::Worst).to_string(), "quality=worst");
        assert_eq!(StageOptions::codec(AudioCodec::Wav).to_string(), "codec=wav");
        assert_eq!(StageOptions::default().to_string(), "default");
    }
}
