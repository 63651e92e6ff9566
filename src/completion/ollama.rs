//! Ollama `/api/chat` adapter.

use crate::completion::{
    Completer, CompletionError, CompletionRequest, CompletionResponse, http_client,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Completer calling a local Ollama runtime without streaming.
#[derive(Debug, Clone)]
pub struct OllamaCompleter {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

impl OllamaCompleter {
    /// Construct a completer for `model` served at `base_url` with a per-call `timeout`.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, CompletionError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl Completer for OllamaCompleter {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let payload = json!({
            "model": self.model,
            "messages": request.messages,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_output_tokens,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| CompletionError::from_transport(error, &self.base_url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CompletionError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaChatResponse = response.json().await.map_err(|error| {
            CompletionError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;
        if !body.done {
            return Err(CompletionError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(CompletionResponse {
            content: body.message.content.trim().to_string(),
        })
    }
}
