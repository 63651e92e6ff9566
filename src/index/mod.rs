//! Partitioned vector index abstraction.
//!
//! A partition is an isolated namespace named after a document fingerprint. Stores persist
//! `(ChunkId, vector, Chunk)` records per partition and answer cosine-ranked similarity queries.

pub mod local;

pub use local::LocalIndexStore;

use crate::processing::types::{Chunk, ChunkId};
use crate::qdrant::QdrantError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors returned by index store adapters.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Partition name contains characters unsafe for file or collection names.
    #[error("invalid partition name '{0}'")]
    InvalidPartition(String),
    /// Filesystem access failed.
    #[error("index I/O failed at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted partition could not be decoded or encoded.
    #[error("corrupt partition data at {path}: {source}")]
    Corrupt {
        /// Partition file path.
        path: PathBuf,
        /// Serialization error.
        #[source]
        source: serde_json::Error,
    },
    /// Query and stored vectors disagree on dimensionality.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the stored vectors.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
    /// Remote vector database failure.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
}

/// Typed reference to a populated partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionHandle {
    name: String,
}

impl PartitionHandle {
    /// Wrap a partition name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Partition name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PartitionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Embedded chunk ready for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Stable chunk identifier, unique within a partition.
    pub id: ChunkId,
    /// Embedding of the chunk content.
    pub vector: Vec<f32>,
    /// Chunk text and metadata.
    pub chunk: Chunk,
}

/// Chunk returned by a similarity query with its cosine score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// Retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query (higher is closer).
    pub score: f32,
}

/// Persistence and retrieval over named partitions.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Number of records stored in `partition` (zero when it does not exist).
    async fn count(&self, partition: &str) -> Result<usize, IndexError>;

    /// Persist `records` into `partition`, creating it when missing. Records whose id is
    /// already present are replaced.
    async fn add(&self, partition: &str, records: Vec<IndexRecord>) -> Result<(), IndexError>;

    /// Return at most `k` chunks ranked by descending similarity to `query`.
    async fn similarity_search(
        &self,
        partition: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError>;
}

/// Reject partition names that are not plain `[A-Za-z0-9_-]` identifiers.
pub fn validate_partition_name(partition: &str) -> Result<(), IndexError> {
    let valid = !partition.is_empty()
        && partition
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(IndexError::InvalidPartition(partition.to_string()))
    }
}

/// Cosine similarity of two equal-length vectors; zero when either has zero norm.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut left_norm = 0.0_f32;
    let mut right_norm = 0.0_f32;
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

/// Current UTC time formatted as RFC 3339, stamped on persisted records.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
