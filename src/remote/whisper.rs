use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{check_status, endpoint, http_client, SpeechToText, TranscriptionRequest};
use crate::job::Credentials;
use crate::stages::StageError;

/// OpenAI-compatible `/audio/transcriptions` client.
pub struct WhisperTranscriber {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
}

impl WhisperTranscriber {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: http_client(),
            url: endpoint(base_url, "audio/transcriptions"),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperTranscriber {
    #[tracing::instrument(skip_all, fields(model = %self.model, bytes = request.audio.len()))]
    async fn transcribe(
        &self,
        request: TranscriptionRequest,
        credentials: &Credentials,
    ) -> Result<String, StageError> {
        let file_name = format!("audio.{}", request.codec.as_str());
        let file = Part::bytes(request.audio)
            .file_name(file_name)
            .mime_str(request.codec.mime_type())?;

        let mut form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(language) = request.language {
            form = form.text("language", language);
        }

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(credentials.expose_secret())
            .multipart(form)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: TranscriptionResponse = response.json().await?;
        let text = body.text.ok_or_else(|| {
            StageError::MalformedResponse("transcription response has no text field".to_string())
        })?;

        tracing::debug!("Received {} characters of transcript", text.len());
        Ok(text)
    }
}
