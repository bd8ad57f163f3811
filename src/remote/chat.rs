use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{check_status, endpoint, http_client, TextGenerator};
use crate::job::Credentials;
use crate::stages::{DocumentStyle, StageError};

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl ChatGenerator {
    pub fn new(base_url: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            client: http_client(),
            url: endpoint(base_url, "chat/completions"),
            model: model.to_string(),
            max_tokens,
        }
    }
}

fn first_choice(response: ChatResponse) -> Result<String, StageError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| StageError::MalformedResponse("completion has no choices".to_string()))
}

#[async_trait]
impl TextGenerator for ChatGenerator {
    #[tracing::instrument(skip_all, fields(model = %self.model, style = style.as_str()))]
    async fn generate(
        &self,
        transcript: &str,
        credentials: &Credentials,
        style: DocumentStyle,
    ) -> Result<String, StageError> {
        let prompt = style.prompt(transcript);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: style.system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(credentials.expose_secret())
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: ChatResponse = response.json().await?;
        first_choice(body)
    }
}
