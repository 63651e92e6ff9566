//! OpenAI-compatible `/embeddings` adapter.

use crate::embedding::{Embedder, EmbeddingClientError, http_client};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const EMBEDDING_BATCH_SIZE: usize = 128;

/// Embedder calling `POST {base}/embeddings`.
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    /// Construct an embedder for `model` at `base_url` with a per-call `timeout`.
    pub fn new(
        base_url: &str,
        api_key: String,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|error| EmbeddingClientError::from_transport(error, &self.base_url))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingClientError::GenerationFailed(
                "rate limited by provider".into(),
            ));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let mut body: EmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode embeddings response: {error}"
            ))
        })?;
        if body.data.len() != texts.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }
        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tracing::debug!(
            provider = "openai",
            model = %self.model,
            texts = texts.len(),
            "Generating embeddings"
        );
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }
}
