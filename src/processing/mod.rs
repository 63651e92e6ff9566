//! Document QA pipeline: chunking, idempotent ingestion, and retrieval-grounded answering.

pub mod answer;
pub mod chunking;
pub mod ingest;
pub mod lock;
pub mod questions;
pub mod retry;
mod service;
pub mod types;

pub use service::{ANSWER_ERROR_PREFIX, QaApi, QaService, ServiceInitError};
pub use types::{
    AnswerError, AttemptError, Chunk, ChunkId, ChunkingError, DocumentRequest, IngestionError,
    Metadata, MetadataValue, ProcessingError, QaResult, TextUnit,
};
