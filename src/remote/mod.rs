//! Speech-to-text and text-generation backends reached over HTTP.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub mod chat;
pub mod whisper;

pub use chat::ChatGenerator;
pub use whisper::WhisperTranscriber;

use crate::job::Credentials;
use crate::stages::{AudioCodec, DocumentStyle, StageError};

/// Audio handed to a speech-to-text backend.
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    pub codec: AudioCodec,
    pub language: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(
        &self,
        request: TranscriptionRequest,
        credentials: &Credentials,
    ) -> Result<String, StageError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        transcript: &str,
        credentials: &Credentials,
        style: DocumentStyle,
    ) -> Result<String, StageError>;
}

/// Shared HTTP client for the API backends.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Pull a readable message out of an error body.
fn api_error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        return parsed.error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}

/// Turn a non-2xx response into a classified failure.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, StageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(StageError::from_status(
        status.as_u16(),
        api_error_message(&body),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_from_api_body() {
        let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#;
        assert_eq!(api_error_message(body), "Incorrect API key provided");
        assert_eq!(api_error_message("  "), "empty response body");
        assert_eq!(api_error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "audio/transcriptions"),
            "https://api.openai.com/v1/audio/transcriptions"
        );
    }
}
