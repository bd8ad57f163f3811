use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::{QualityHint, Stage, StageContext, StageError, StageInput, StageKind, StageOutput};
use crate::sources::VideoSource;

/// Downloads the job's source into the raw-video slot.
pub struct FetchStage {
    source: Arc<dyn VideoSource>,
}

impl FetchStage {
    pub fn new(source: Arc<dyn VideoSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Stage for FetchStage {
    fn kind(&self) -> StageKind {
        StageKind::Fetch
    }

    async fn execute(
        &self,
        input: StageInput<'_>,
        ctx: &StageContext<'_>,
        output: &Path,
    ) -> Result<StageOutput, StageError> {
        let job = input.job()?;
        let quality = ctx.options.quality.unwrap_or(QualityHint::Best);

        tracing::info!(
            "Fetching {} ({})",
            crate::utils::extract_domain(job.source()).unwrap_or_else(|| job.source().to_string()),
            quality.as_str()
        );
        self.source.fetch(job.source(), quality, output).await?;

        Ok(StageOutput::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{Artifact, ArtifactKind};
    use crate::job::{Credentials, Job};
    use crate::sources::MockVideoSource;
    use crate::stages::{DocumentStyle, StageOptions};
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_fetch_uses_quality_from_options() {
        let mut source = MockVideoSource::new();
        source
            .expect_fetch()
            .withf(|src, quality, _| {
                src.to_string() == "https://youtu.be/abc" && *quality == QualityHint::Worst
            })
            .times(1)
            .returning(|_, _, dest| {
                std::fs::write(dest, b"video").unwrap();
                Ok(())
            });

        let dir = tempfile::tempdir().unwrap();
        let job = Job::new("https://youtu.be/abc", Credentials::new("k"));
        let options = StageOptions::quality(QualityHint::Worst);
        let ctx = StageContext {
            credentials: job.credentials(),
            options: &options,
            style: DocumentStyle::Summary,
            language: None,
        };

        let stage = FetchStage::new(Arc::new(source));
        let out = dir.path().join("v.media");
        stage.execute(StageInput::Job(&job), &ctx, &out).await.unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_fetch_rejects_artifact_input() {
        let mut source = MockVideoSource::new();
        source.expect_fetch().never();

        let creds = Credentials::new("k");
        let options = StageOptions::default();
        let ctx = StageContext {
            credentials: &creds,
            options: &options,
            style: DocumentStyle::Summary,
            language: None,
        };
        let artifact = Artifact {
            kind: ArtifactKind::RawAudio,
            path: PathBuf::from("/tmp/a"),
            size: 1,
            sha256: None,
            format: None,
        };

        let err = FetchStage::new(Arc::new(source))
            .execute(StageInput::Artifact(&artifact), &ctx, Path::new("/tmp/out"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ContractViolation(_)));
    }
}
