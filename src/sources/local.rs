use async_trait::async_trait;
use std::path::Path;

use super::VideoSource;
use crate::stages::{QualityHint, StageError};

/// Treats a path on disk as an already-downloaded video.
pub struct LocalSource;

impl LocalSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoSource for LocalSource {
    async fn fetch(
        &self,
        source: &str,
        _quality: QualityHint,
        dest: &Path,
    ) -> Result<(), StageError> {
        let path = Path::new(source);
        if !path.is_file() {
            return Err(StageError::MissingInput(path.to_path_buf()));
        }

        tracing::debug!("Copying local file {} -> {}", path.display(), dest.display());
        tokio::fs::copy(path, dest).await?;
        Ok(())
    }

    fn supports(&self, source: &str) -> bool {
        // First, check if it's clearly a URL
        if source.starts_with("http://") || source.starts_with("https://") {
            return false;
        }

        let path = Path::new(source);
        if path.exists() {
            return true;
        }

        // Check if it looks like a file path (has file extension or path separators)
        let has_extension = path.extension().is_some();
        let has_path_separators = source.contains('/') || source.contains('\\');

        has_extension || has_path_separators
    }

    fn platform_name(&self) -> &'static str {
        "Local File"
    }
}

impl Default for LocalSource {
    fn default() -> Self {
        Self::new()
    }
}
