use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::{AudioCodec, Stage, StageContext, StageError, StageInput, StageKind, StageOutput};
use crate::artifacts::ArtifactKind;
use crate::remote::{SpeechToText, TranscriptionRequest};

/// Sends the extracted audio to the speech-to-text backend.
pub struct TranscribeStage {
    backend: Arc<dyn SpeechToText>,
}

impl TranscribeStage {
    pub fn new(backend: Arc<dyn SpeechToText>) -> Self {
        Self { backend }
    }
}

/// Read an input artifact, treating a vanished file as fatal.
pub(crate) async fn read_input(path: &Path) -> Result<Vec<u8>, StageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StageError::MissingInput(path.to_path_buf()))
        }
        Err(e) => Err(StageError::Filesystem(e)),
    }
}

#[async_trait]
impl Stage for TranscribeStage {
    fn kind(&self) -> StageKind {
        StageKind::Transcribe
    }

    async fn execute(
        &self,
        input: StageInput<'_>,
        ctx: &StageContext<'_>,
        output: &Path,
    ) -> Result<StageOutput, StageError> {
        let audio = input.artifact(ArtifactKind::RawAudio)?;
        let codec = audio
            .format
            .as_deref()
            .and_then(AudioCodec::from_extension)
            .unwrap_or(AudioCodec::Mp3);

        tracing::info!(
            "Transcribing {} of {} audio",
            crate::utils::format_file_size(audio.size),
            codec.as_str()
        );
        let request = TranscriptionRequest {
            audio: read_input(&audio.path).await?,
            codec,
            language: ctx.language.map(str::to_string),
        };
        let text = self.backend.transcribe(request, ctx.credentials).await?;

        // Whitespace-only transcripts end up as an empty artifact
        tokio::fs::write(output, text.trim()).await?;
        Ok(StageOutput::with_format("text"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::Artifact;
    use crate::job::Credentials;
    use crate::remote::MockSpeechToText;
    use crate::stages::{DocumentStyle, StageOptions};

    fn audio_artifact(dir: &Path, format: Option<&str>) -> Artifact {
        let path = dir.join("in.audio");
        std::fs::write(&path, b"ID3 fake audio").unwrap();
        Artifact {
            kind: ArtifactKind::RawAudio,
            path,
            size: 14,
            sha256: None,
            format: format.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_transcript_is_written_trimmed() {
        let mut backend = MockSpeechToText::new();
        backend
            .expect_transcribe()
            .withf(|request, creds| {
                request.codec == AudioCodec::M4a
                    && request.language.as_deref() == Some("en")
                    && creds.expose_secret() == "sk-test"
            })
            .times(1)
            .returning(|_, _| Ok("  hello world \n".to_string()));

        let dir = tempfile::tempdir().unwrap();
        let audio = audio_artifact(dir.path(), Some("m4a"));
        let creds = Credentials::new("sk-test");
        let options = StageOptions::default();
        let ctx = StageContext {
            credentials: &creds,
            options: &options,
            style: DocumentStyle::Summary,
            language: Some("en"),
        };
        let out = dir.path().join("t.txt");

        TranscribeStage::new(Arc::new(backend))
            .execute(StageInput::Artifact(&audio), &ctx, &out)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retryable() {
        let mut backend = MockSpeechToText::new();
        backend
            .expect_transcribe()
            .times(1)
            .returning(|_, _| Err(StageError::from_status(401, "Incorrect API key provided")));

        let dir = tempfile::tempdir().unwrap();
        let audio = audio_artifact(dir.path(), None);
        let creds = Credentials::new("bad");
        let options = StageOptions::default();
        let ctx = StageContext {
            credentials: &creds,
            options: &options,
            style: DocumentStyle::Summary,
            language: None,
        };

        let err = TranscribeStage::new(Arc::new(backend))
            .execute(StageInput::Artifact(&audio), &ctx, &dir.path().join("t.txt"))
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_vanished_input_is_fatal() {
        let err = read_input(Path::new("/definitely/not/here.audio")).await.unwrap_err();
        assert!(matches!(err, StageError::MissingInput(_)));
    }
}
