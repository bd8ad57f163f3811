use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use url::Url;

pub mod direct;
pub mod local;
pub mod ytdlp;

use crate::stages::{QualityHint, StageError};

/// Something that can retrieve the bytes of a remote (or local) video.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Write the media behind `source` to `dest`.
    async fn fetch(&self, source: &str, quality: QualityHint, dest: &Path)
        -> Result<(), StageError>;

    /// Check if this source can handle the given reference
    fn supports(&self, source: &str) -> bool;

    /// Get the name of this backend
    fn platform_name(&self) -> &'static str;
}

/// Which download strategy the Fetch stage uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchBackend {
    /// Pick per source: local files, direct media links, then yt-dlp.
    #[default]
    Auto,
    YtDlp,
    Direct,
    Local,
}

/// Registry for the configured download strategies.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn VideoSource>>,
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Build the registry for a backend choice.
    pub fn for_backend(backend: FetchBackend, yt_dlp_path: &str) -> Self {
        let mut registry = Self::empty();
        match backend {
            FetchBackend::Auto => {
                // Order matters: the first source that supports a reference wins
                registry.register(Arc::new(local::LocalSource::new()));
                registry.register(Arc::new(direct::DirectSource::new()));
                registry.register(Arc::new(ytdlp::YtDlpSource::new(yt_dlp_path)));
            }
            FetchBackend::YtDlp => registry.register(Arc::new(ytdlp::YtDlpSource::new(yt_dlp_path))),
            FetchBackend::Direct => registry.register(Arc::new(direct::DirectSource::new())),
            FetchBackend::Local => registry.register(Arc::new(local::LocalSource::new())),
        }
        registry
    }

    pub fn register(&mut self, source: Arc<dyn VideoSource>) {
        self.sources.push(source);
    }

    /// Find a source that supports the given reference
    pub fn find(&self, source: &str) -> Option<&dyn VideoSource> {
        self.sources
            .iter()
            .find(|candidate| candidate.supports(source))
            .map(|arc| arc.as_ref())
    }

    /// List all registered backends
    pub fn list_platforms(&self) -> Vec<&'static str> {
        self.sources
            .iter()
            .map(|source| source.platform_name())
            .collect()
    }
}

#[async_trait]
impl VideoSource for SourceRegistry {
    async fn fetch(
        &self,
        source: &str,
        quality: QualityHint,
        dest: &Path,
    ) -> Result<(), StageError> {
        let backend = self.find(source).ok_or_else(|| {
            StageError::Unsupported(format!("no download backend accepts {}", source))
        })?;

        tracing::debug!("Fetching {} via {}", source, backend.platform_name());
        backend.fetch(source, quality, dest).await
    }

    fn supports(&self, source: &str) -> bool {
        self.find(source).is_some()
    }

    fn platform_name(&self) -> &'static str {
        "Registry"
    }
}

/// Validate and normalize URLs
pub fn validate_url(url: &str) -> Result<Url, StageError> {
    let parsed =
        Url::parse(url).map_err(|_| StageError::Unsupported(format!("Invalid URL format: {}", url)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(StageError::Unsupported(
            "URL must use HTTP or HTTPS protocol".to_string(),
        ));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_auto_registry_routes_by_source_shape() {
        let registry = SourceRegistry::for_backend(FetchBackend::Auto, "yt-dlp");
        assert_eq!(
            registry.list_platforms(),
            vec!["Local File", "Direct URL", "yt-dlp"]
        );
        assert_eq!(
            registry.find("https://cdn.example.com/talk.mp4").map(|s| s.platform_name()),
            Some("Direct URL")
        );
        assert_eq!(
            registry.find("https://www.youtube.com/watch?v=abc").map(|s| s.platform_name()),
            Some("yt-dlp")
        );
        assert_eq!(
            registry.find("./recording.mkv").map(|s| s.platform_name()),
            Some("Local File")
        );
    }

    #[tokio::test]
    async fn test_registry_rejects_unsupported_sources() {
        let registry = SourceRegistry::for_backend(FetchBackend::Direct, "yt-dlp");
        let err = registry
            .fetch("https://www.youtube.com/watch?v=abc", QualityHint::Best, Path::new("/tmp/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Unsupported(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_registry_delegates_to_first_supporting_source() {
        let mut skipped = MockVideoSource::new();
        skipped.expect_supports().return_const(false);
        skipped.expect_platform_name().return_const("skipped");
        skipped.expect_fetch().never();

        let mut chosen = MockVideoSource::new();
        chosen.expect_supports().return_const(true);
        chosen.expect_platform_name().return_const("chosen");
        chosen
            .expect_fetch()
            .withf(|source, quality, _| {
                source.to_string() == "https://host/v" && *quality == QualityHint::Worst
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut registry = SourceRegistry::empty();
        registry.register(Arc::new(skipped));
        registry.register(Arc::new(chosen));

        registry
            .fetch("https://host/v", QualityHint::Worst, &PathBuf::from("/tmp/out"))
            .await
            .unwrap();
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("not-a-url").is_err());
    }
}
