//! OpenAI-compatible `/chat/completions` adapter.

use crate::completion::{
    ChatMessage, Completer, CompletionError, CompletionRequest, CompletionResponse, http_client,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Completer calling `POST {base}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiCompleter {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompleter {
    /// Construct a completer for `model` at `base_url` with a per-call `timeout`.
    pub fn new(
        base_url: &str,
        api_key: String,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Completer for OpenAiCompleter {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&ChatCompletionRequest {
                model: &self.model,
                messages: &request.messages,
                temperature: request.temperature,
                max_tokens: request.max_output_tokens,
            })
            .send()
            .await
            .map_err(|error| CompletionError::from_transport(error, &self.base_url))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode completion: {error}"))
        })?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::InvalidResponse("response had no content".into()))?;

        Ok(CompletionResponse {
            content: content.trim().to_string(),
        })
    }
}
