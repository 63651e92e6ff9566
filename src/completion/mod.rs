//! Chat-completion capability and provider adapters.
//!
//! The model identifier and per-call timeout are fixed when an adapter is built; sampling
//! temperature and output budget travel with each [`CompletionRequest`].

mod ollama;
mod openai;

pub use ollama::OllamaCompleter;
pub use openai::OpenAiCompleter;

use crate::config::{CompletionProvider, Config};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// Provider could not be reached or configured.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The call exceeded the configured timeout.
    #[error("Completion timed out: {0}")]
    Timeout(String),
    /// Provider asked the caller to slow down.
    #[error("Completion provider rate limited the request")]
    RateLimited,
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// Short, stable name of the failure used in placeholder answers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderUnavailable(_) => "ProviderUnavailable",
            Self::Timeout(_) => "Timeout",
            Self::RateLimited => "RateLimited",
            Self::GenerationFailed(_) => "GenerationFailed",
            Self::InvalidResponse(_) => "InvalidResponse",
        }
    }

    fn from_transport(error: reqwest::Error, base_url: &str) -> Self {
        if error.is_timeout() {
            Self::Timeout(format!("request to {base_url} timed out"))
        } else {
            Self::ProviderUnavailable(format!("failed to reach {base_url}: {error}"))
        }
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions constraining the model.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

/// One turn of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// System instruction message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Request passed to a chat-completion provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Conversation, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
}

/// Text produced by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    /// Assistant message content.
    pub content: String,
}

/// Interface implemented by chat-completion providers.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Generate the assistant reply for `request`.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;
}

/// Build the completer selected by configuration.
pub fn build_completer(config: &Config) -> Result<Arc<dyn Completer>, CompletionError> {
    let completer: Arc<dyn Completer> = match config.completion_provider {
        CompletionProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                CompletionError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiCompleter::new(
                &config.openai_base_url,
                api_key,
                &config.completion_model,
                config.completion_timeout,
            )?)
        }
        CompletionProvider::Ollama => Arc::new(OllamaCompleter::new(
            &config.ollama_url,
            &config.completion_model,
            config.completion_timeout,
        )?),
    };
    tracing::info!(
        provider = ?config.completion_provider,
        model = %config.completion_model,
        timeout_secs = config.completion_timeout.as_secs_f64(),
        "Completion client initialized"
    );
    Ok(completer)
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, CompletionError> {
    reqwest::Client::builder()
        .user_agent("docqa/completion")
        .timeout(timeout)
        .build()
        .map_err(|error| CompletionError::ProviderUnavailable(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let message = ChatMessage::system("rules");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            serde_json::json!({ "role": "system", "content": "rules" })
        );
    }

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(CompletionError::RateLimited.kind(), "RateLimited");
        assert_eq!(CompletionError::Timeout("x".into()).kind(), "Timeout");
        assert_eq!(
            CompletionError::GenerationFailed("x".into()).kind(),
            "GenerationFailed"
        );
    }
}
