//! Core data types and error definitions for the processing pipeline.

use crate::{
    completion::CompletionError, embedding::EmbeddingClientError, extraction::ExtractionError,
    index::IndexError, processing::lock::LockError, processing::questions::QuestionsError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Scalar value stored in chunk metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer, e.g. a 1-based page number.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Free-form text, e.g. the `source` kind tag.
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Metadata attached to text units and chunks. Keys iterate in sorted order.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Metadata key carrying the extraction source kind.
pub const SOURCE_KEY: &str = "source";
/// Metadata key carrying the 1-based page number for paged documents.
pub const PAGE_KEY: &str = "page";

/// One logical span of extracted text, such as a PDF page or a whole JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct TextUnit {
    /// Extracted text.
    pub content: String,
    /// Source metadata (`source`, optionally `page`).
    pub metadata: Metadata,
}

impl TextUnit {
    /// Build a text unit from content and metadata.
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Bounded slice of a [`TextUnit`], the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text.
    pub content: String,
    /// Metadata inherited from the originating text unit.
    pub metadata: Metadata,
}

impl Chunk {
    /// Build a chunk from content and metadata.
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// Page number recorded in the metadata, if any.
    pub fn page(&self) -> Option<i64> {
        match self.metadata.get(PAGE_KEY) {
            Some(MetadataValue::Integer(page)) => Some(*page),
            _ => None,
        }
    }

    /// Render metadata pairs as `key=value` separated by `, ` in key order.
    pub fn render_metadata(&self) -> String {
        self.metadata
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Bracketed metadata rendering that feeds the chunk id digest.
    pub(crate) fn metadata_signature(&self) -> String {
        format!("[{}]", self.render_metadata())
    }
}

/// Deterministic identifier of a chunk within a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Wrap an already-derived identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Question paired with its answer (or error placeholder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaResult {
    /// Question as submitted (trimmed).
    pub question: String,
    /// Model answer, the not-found sentinel, or an error placeholder.
    pub answer: String,
}

/// Document upload plus the questions to answer against it.
#[derive(Debug, Clone)]
pub struct DocumentRequest {
    /// Caller-supplied file name; its extension selects the extractor.
    pub file_name: String,
    /// Raw document bytes.
    pub bytes: Vec<u8>,
    /// Questions to answer, in response order.
    pub questions: Vec<String>,
}

/// Errors produced while splitting text units into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunk size and overlap cannot produce bounded chunks.
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),
}

/// Errors produced while writing a document's chunks into its partition.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Nothing to ingest.
    #[error("document produced no chunks")]
    EmptyExtraction,
    /// The index store could not be queried or written.
    #[error("index unavailable for partition '{partition}': {source}")]
    IndexUnavailable {
        /// Partition being ingested.
        partition: String,
        /// Underlying store failure.
        #[source]
        source: IndexError,
    },
    /// The partition lock could not be acquired.
    #[error("partition lock unavailable: {0}")]
    LockUnavailable(#[from] LockError),
    /// Embedding provider failed to vectorise the chunks.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
}

/// Failure of a single retrieve-render-invoke attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Query embedding failed.
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Similarity search failed.
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),
    /// Model invocation failed.
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
}

impl AttemptError {
    /// Short, stable name of the failing stage used in placeholder answers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedding(_) => "EmbeddingError",
            Self::Retrieval(_) => "RetrievalError",
            Self::Completion(error) => error.kind(),
        }
    }
}

/// Permanent failure to answer one question.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Every configured attempt failed; carries the last failure.
    #[error("answer failed after {attempts} attempt(s): {source}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Failure reported by the final attempt.
        #[source]
        source: AttemptError,
    },
}

impl AnswerError {
    /// Short, stable name of the last failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Exhausted { source, .. } => source.kind(),
        }
    }
}

/// Request-level failures of the document QA pipeline.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Question list is empty or too long.
    #[error(transparent)]
    Questions(#[from] QuestionsError),
    /// Document could not be read as its declared kind.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Chunker configuration is unusable.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Extraction yielded no usable text.
    #[error("No extractable text found in document")]
    EmptyExtraction,
    /// Ingestion into the index failed.
    #[error("Failed to ingest document: {0}")]
    Ingestion(#[from] IngestionError),
}
