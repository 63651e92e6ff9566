//! Document QA service: extract, chunk, ingest once, then answer each question.

use crate::{
    completion::{Completer, CompletionError, build_completer},
    config::{Config, IndexBackend},
    embedding::{Embedder, EmbeddingClientError, build_embedder},
    extraction::DocumentKind,
    fingerprint::partition_name,
    index::{IndexStore, LocalIndexStore},
    metrics::{MetricsSnapshot, QaMetrics},
    processing::{
        answer::{AnswerSettings, AnsweringEngine},
        chunking::{ChunkingConfig, RecursiveChunker},
        ingest::IngestionCoordinator,
        lock::PartitionLocks,
        questions::{check_question_limit, normalize_questions},
        retry::RetryPolicy,
        types::{ChunkingError, DocumentRequest, ProcessingError, QaResult},
    },
    qdrant::{QdrantError, QdrantIndexStore},
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Prefix of the answer recorded when a question cannot be answered.
pub const ANSWER_ERROR_PREFIX: &str = "Error answering question: ";

/// Errors raised while wiring the service from configuration.
#[derive(Debug, Error)]
pub enum ServiceInitError {
    /// Chunker settings are unusable.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// Embedding provider could not be built.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Completion provider could not be built.
    #[error(transparent)]
    Completion(#[from] CompletionError),
    /// Qdrant client could not be built.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// The qdrant backend was selected without a URL.
    #[error("QDRANT_URL is required when INDEX_BACKEND=qdrant")]
    MissingQdrantUrl,
}

/// Abstraction over the QA pipeline used by external surfaces (HTTP, CLI).
#[async_trait]
pub trait QaApi: Send + Sync {
    /// Answer every question in `request` against its document.
    async fn answer_document(
        &self,
        request: DocumentRequest,
    ) -> Result<Vec<QaResult>, ProcessingError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Coordinates the full pipeline for one document request.
///
/// Construct once near process start and share through an `Arc`; partitions written by one
/// request are reused by later requests for the same document bytes.
pub struct QaService {
    chunker: RecursiveChunker,
    ingestion: IngestionCoordinator,
    engine: AnsweringEngine,
    metrics: Arc<QaMetrics>,
    max_questions: usize,
}

impl QaService {
    /// Compose a service from already-built parts.
    pub fn new(
        chunker: RecursiveChunker,
        ingestion: IngestionCoordinator,
        engine: AnsweringEngine,
        max_questions: usize,
    ) -> Self {
        Self {
            chunker,
            ingestion,
            engine,
            metrics: Arc::new(QaMetrics::new()),
            max_questions,
        }
    }

    /// Build every capability from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ServiceInitError> {
        let chunker = RecursiveChunker::new(ChunkingConfig {
            max_chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separators: config.chunk_separators.clone(),
        })?;
        let embedder = build_embedder(config)?;
        let completer = build_completer(config)?;
        let store = build_store(config)?;
        let locks = Arc::new(PartitionLocks::new(
            config.index_dir.clone(),
            config.ingest_lock_timeout,
        ));

        let settings = AnswerSettings {
            top_k: config.top_k,
            temperature: config.completion_temperature,
            max_output_tokens: config.completion_max_output_tokens,
            retry: RetryPolicy {
                max_attempts: config.answer_max_attempts,
                initial_backoff: config.answer_backoff_initial,
                max_backoff: config.answer_backoff_max,
            },
        };

        Ok(Self::with_capabilities(
            chunker,
            embedder,
            store,
            completer,
            locks,
            settings,
            config.max_questions,
        ))
    }

    /// Wire ingestion and answering over shared capabilities.
    pub fn with_capabilities(
        chunker: RecursiveChunker,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        completer: Arc<dyn Completer>,
        locks: Arc<PartitionLocks>,
        settings: AnswerSettings,
        max_questions: usize,
    ) -> Self {
        let ingestion = IngestionCoordinator::new(embedder.clone(), store.clone(), locks);
        let engine = AnsweringEngine::new(embedder, store, completer, settings);
        Self::new(chunker, ingestion, engine, max_questions)
    }

    /// Run the pipeline for one request. Per-question failures become placeholder answers.
    pub async fn answer_document(
        &self,
        request: DocumentRequest,
    ) -> Result<Vec<QaResult>, ProcessingError> {
        let questions = normalize_questions(request.questions)?;
        check_question_limit(questions.len(), self.max_questions)?;

        let kind = DocumentKind::from_file_name(&request.file_name)?;
        let units = kind.extractor().extract(&request.bytes)?;
        if units.is_empty() {
            return Err(ProcessingError::EmptyExtraction);
        }

        let chunks = self.chunker.chunk(&units);
        if chunks.is_empty() {
            return Err(ProcessingError::EmptyExtraction);
        }

        let partition = partition_name(&request.bytes);
        tracing::info!(
            partition = %partition,
            kind = %kind,
            units = units.len(),
            chunks = chunks.len(),
            questions = questions.len(),
            "Ingest start"
        );

        let outcome = self.ingestion.ingest(&partition, chunks).await?;
        self.metrics
            .record_document(outcome.written.then_some(outcome.chunk_count as u64));

        let mut results = Vec::with_capacity(questions.len());
        for question in questions {
            let answer = match self.engine.answer(&outcome.partition, &question).await {
                Ok(answer) => {
                    self.metrics.record_answer(true);
                    answer
                }
                Err(error) => {
                    self.metrics.record_answer(false);
                    tracing::warn!(
                        partition = %outcome.partition,
                        error = %error,
                        "Recording error placeholder for question"
                    );
                    format!("{ANSWER_ERROR_PREFIX}{}", error.kind())
                }
            };
            results.push(QaResult { question, answer });
        }

        Ok(results)
    }

    /// Configured ceiling on questions per request.
    pub fn max_questions(&self) -> usize {
        self.max_questions
    }

    /// Return a snapshot of accumulated metrics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[async_trait]
impl QaApi for QaService {
    async fn answer_document(
        &self,
        request: DocumentRequest,
    ) -> Result<Vec<QaResult>, ProcessingError> {
        QaService::answer_document(self, request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        QaService::metrics_snapshot(self)
    }
}

fn build_store(config: &Config) -> Result<Arc<dyn IndexStore>, ServiceInitError> {
    let store: Arc<dyn IndexStore> = match config.index_backend {
        IndexBackend::Qdrant => {
            let url = config
                .qdrant_url
                .as_deref()
                .ok_or(ServiceInitError::MissingQdrantUrl)?;
            Arc::new(QdrantIndexStore::connect(
                url,
                config.qdrant_api_key.clone(),
            )?)
        }
        IndexBackend::Local => Arc::new(LocalIndexStore::new(&config.index_dir)),
    };
    tracing::info!(backend = ?config.index_backend, "Index store initialized");
    Ok(store)
}
