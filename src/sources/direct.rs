use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use url::Url;

use super::VideoSource;
use crate::stages::{QualityHint, StageError};

/// Plain HTTP download of a direct media link.
pub struct DirectSource {
    client: Client,
}

impl DirectSource {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Check if URL points to an audio or video file
    fn is_media_url(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let path = parsed.path().to_lowercase();

        let media_extensions = [
            ".mp3", ".m4a", ".wav", ".flac", ".ogg", ".aac", ".mp4", ".avi", ".mov", ".mkv",
            ".webm", ".m4v",
        ];

        media_extensions.iter().any(|ext| path.ends_with(ext))
    }
}

/// A body served as HTML or JSON is an error page, not media.
fn is_non_media_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.starts_with("text/") || content_type.contains("json")
}

/// A direct link has one rendition, so an error page is retried as is.
fn check_content_type(source: &str, content_type: &str) -> Result<(), StageError> {
    if is_non_media_content_type(content_type) {
        return Err(StageError::MalformedResponse(format!(
            "{} served {} instead of media",
            source, content_type
        )));
    }
    Ok(())
}

#[async_trait]
impl VideoSource for DirectSource {
    #[tracing::instrument(skip(self, dest))]
    async fn fetch(
        &self,
        source: &str,
        quality: QualityHint,
        dest: &Path,
    ) -> Result<(), StageError> {
        if quality != QualityHint::Best {
            tracing::debug!(
                "Direct links have a single rendition; ignoring quality hint {}",
                quality.as_str()
            );
        }

        let response = self.client.get(source).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::from_status(
                status.as_u16(),
                format!("download failed: {}", body.trim()),
            ));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
        {
            check_content_type(source, content_type)?;
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StageError::Network(e.to_string()))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!(
            "Downloaded {}",
            crate::utils::format_file_size(downloaded)
        );
        Ok(())
    }

    fn supports(&self, source: &str) -> bool {
        self.is_media_url(source)
    }

    fn platform_name(&self) -> &'static str {
        "Direct URL"
    }
}

impl Default for DirectSource {
    fn default() -> Self {
        Self::new()
    }
}
