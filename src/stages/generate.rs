use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::transcribe::read_input;
use super::{Stage, StageContext, StageError, StageInput, StageKind, StageOutput};
use crate::artifacts::ArtifactKind;
use crate::remote::TextGenerator;

/// Kind of document produced from the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentStyle {
    /// Short summary of the video
    #[default]
    Summary,
    /// Long-form blog post based on the video
    BlogPost,
}

impl DocumentStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStyle::Summary => "summary",
            DocumentStyle::BlogPost => "blog-post",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            DocumentStyle::Summary => {
                "You summarize video transcripts accurately and concisely. Do not invent facts."
            }
            DocumentStyle::BlogPost => {
                "You turn video transcripts into well-structured Markdown blog posts with a title and headings. Do not invent facts."
            }
        }
    }

    pub fn prompt(&self, transcript: &str) -> String {
        match self {
            DocumentStyle::Summary => format!("Summarize the following text:\n\n{}", transcript),
            DocumentStyle::BlogPost => format!(
                "Write a blog post based on the following transcript:\n\n{}",
                transcript
            ),
        }
    }
}

/// Turns the transcript into the final document.
pub struct GenerateStage {
    backend: Arc<dyn TextGenerator>,
}

impl GenerateStage {
    pub fn new(backend: Arc<dyn TextGenerator>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Stage for GenerateStage {
    fn kind(&self) -> StageKind {
        StageKind::Generate
    }

    async fn execute(
        &self,
        input: StageInput<'_>,
        ctx: &StageContext<'_>,
        output: &Path,
    ) -> Result<StageOutput, StageError> {
        let transcript = input.artifact(ArtifactKind::TranscriptText)?;
        let bytes = read_input(&transcript.path).await?;
        let text = String::from_utf8(bytes).map_err(|e| {
            StageError::ContractViolation(format!("transcript is not valid UTF-8: {}", e))
        })?;

        tracing::info!("Generating {} from {} characters", ctx.style.as_str(), text.len());
        let document = self
            .backend
            .generate(&text, ctx.credentials, ctx.style)
            .await?;

        tokio::fs::write(output, document.trim()).await?;
        Ok(StageOutput::with_format("markdown"))
    }
}
