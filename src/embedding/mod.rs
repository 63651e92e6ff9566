//! Embedding capability and provider adapters.
//!
//! Providers are picked once from configuration by [`build_embedder`] and shared behind an
//! `Arc<dyn Embedder>`. [`HashEmbedder`] needs no network and backs offline runs and tests.

mod ollama;
mod openai;

pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or configured.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed or had the wrong shape.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingClientError {
    fn from_transport(error: reqwest::Error, target: &str) -> Self {
        if error.is_timeout() {
            Self::ProviderUnavailable(format!("request to {target} timed out"))
        } else {
            Self::ProviderUnavailable(format!("failed to reach {target}: {error}"))
        }
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Produce one vector per text, in input order.
    async fn embed_documents(&self, texts: &[String])
    -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Produce the vector for a single query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            EmbeddingClientError::InvalidResponse("provider returned no vectors".into())
        })
    }
}

/// Deterministic offline embedder hashing lowercase words into a fixed number of buckets.
///
/// Texts sharing vocabulary land close together under cosine similarity, which is enough to
/// exercise retrieval without a model.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Construct a hash embedder producing `dimension`-length vectors.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];

        for word in text
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let bucket = fnv1a(word.to_lowercase().as_bytes()) % self.dimension as u64;
            embedding[bucket as usize] += 1.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_documents(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        tracing::debug!(
            provider = "hash",
            dimension = self.dimension,
            texts = texts.len(),
            "Generating embeddings"
        );
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

/// Build the embedder selected by configuration.
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>, EmbeddingClientError> {
    let embedder: Arc<dyn Embedder> = match config.embedding_provider {
        EmbeddingProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiEmbedder::new(
                &config.openai_base_url,
                api_key,
                &config.embedding_model,
                config.embedding_timeout,
            )?)
        }
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
            &config.ollama_url,
            &config.embedding_model,
            config.embedding_timeout,
        )?),
        EmbeddingProvider::Hash => Arc::new(HashEmbedder::new(config.embedding_dimension)),
    };
    tracing::info!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        timeout_secs = config.embedding_timeout.as_secs_f64(),
        "Embedding client initialized"
    );
    Ok(embedder)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, EmbeddingClientError> {
    reqwest::Client::builder()
        .user_agent("docqa/embedding")
        .timeout(timeout)
        .build()
        .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::cosine_similarity;

    #[tokio::test]
    async fn hash_embeddings_are_normalized_and_deterministic() {
        let embedder = HashEmbedder::new(64);
        let texts = vec!["Payment terms are net 30".to_string(), String::new()];
        let first = embedder.embed_documents(&texts).await.unwrap();
        let second = embedder.embed_documents(&texts).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].len(), 64);
        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(first[1].iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let embedder = HashEmbedder::new(256);
        let query = embedder.embed_query("When is payment due?").await.unwrap();
        let related = embedder
            .embed_query("Payment is due within 30 days of invoice.")
            .await
            .unwrap();
        let unrelated = embedder
            .embed_query("The warehouse stores blue crates.")
            .await
            .unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn zero_dimension_is_rejected() {
        let error = HashEmbedder::new(0)
            .embed_documents(&["text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingClientError::GenerationFailed(_)));
    }

    #[test]
    fn factory_builds_offline_embedder() {
        let config = Config::from_lookup(|key| match key {
            "EMBEDDING_PROVIDER" => Some("hash".into()),
            "COMPLETION_PROVIDER" => Some("ollama".into()),
            "EMBEDDING_DIMENSION" => Some("32".into()),
            "INDEX_BACKEND" => Some("local".into()),
            _ => None,
        })
        .expect("config");
        assert!(build_embedder(&config).is_ok());
    }
}
