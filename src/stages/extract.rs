use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::{AudioCodec, Stage, StageContext, StageError, StageInput, StageKind, StageOutput};
use crate::artifacts::ArtifactKind;
use crate::transcode::AudioTranscoder;

/// Isolates the audio track of the fetched video.
pub struct ExtractAudioStage {
    transcoder: Arc<dyn AudioTranscoder>,
}

impl ExtractAudioStage {
    pub fn new(transcoder: Arc<dyn AudioTranscoder>) -> Self {
        Self { transcoder }
    }
}

#[async_trait]
impl Stage for ExtractAudioStage {
    fn kind(&self) -> StageKind {
        StageKind::ExtractAudio
    }

    async fn execute(
        &self,
        input: StageInput<'_>,
        ctx: &StageContext<'_>,
        output: &Path,
    ) -> Result<StageOutput, StageError> {
        let video = input.artifact(ArtifactKind::RawVideo)?;
        let codec = ctx.options.codec.unwrap_or(AudioCodec::Mp3);

        tracing::info!(
            "Extracting {} audio from {}",
            codec.as_str(),
            crate::utils::format_file_size(video.size)
        );
        self.transcoder.extract(&video.path, codec, output).await?;

        Ok(StageOutput::with_format(codec.as_str()))
    }
}
