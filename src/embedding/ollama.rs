//! Ollama `/api/embed` adapter.

use crate::embedding::{Embedder, EmbeddingClientError, http_client};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Embedder calling a local Ollama runtime.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbedder {
    /// Construct an embedder for `model` served at `base_url` with a per-call `timeout`.
    pub fn new(
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(
            provider = "ollama",
            model = %self.model,
            texts = texts.len(),
            "Generating embeddings"
        );

        let response = self
            .http
            .post(self.endpoint())
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| EmbeddingClientError::from_transport(error, &self.base_url))?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404: {body}",
                self.endpoint()
            )));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: EmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;
        if body.embeddings.len() != texts.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn embedder(server: &MockServer, model: &str) -> OllamaEmbedder {
        OllamaEmbedder::new(&server.base_url(), model, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn posts_batch_to_embed_endpoint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/embed")
                    .json_body(json!({ "model": "nomic-embed-text", "input": ["a", "b"] }));
                then.status(200)
                    .json_body(json!({ "embeddings": [[0.1, 0.2], [0.3, 0.4]] }));
            })
            .await;

        let embedder = embedder(&server, "nomic-embed-text");
        let vectors = embedder
            .embed_documents(&["a".into(), "b".into()])
            .await
            .expect("embeddings");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn missing_model_endpoint_is_unavailable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(404).body("model not found");
            })
            .await;

        let embedder = embedder(&server, "missing");
        let error = embedder.embed_query("hi").await.unwrap_err();
        assert!(matches!(error, EmbeddingClientError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn count_mismatch_is_invalid_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [] }));
            })
            .await;

        let embedder = embedder(&server, "m");
        let error = embedder.embed_query("hi").await.unwrap_err();
        assert!(matches!(error, EmbeddingClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn hung_provider_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .json_body(json!({ "embeddings": [[0.1]] }));
            })
            .await;

        let embedder =
            OllamaEmbedder::new(&server.base_url(), "m", Duration::from_millis(100)).unwrap();
        let error = embedder.embed_query("hi").await.unwrap_err();
        assert!(
            matches!(error, EmbeddingClientError::ProviderUnavailable(ref message) if message.contains("timed out"))
        );
    }
}
