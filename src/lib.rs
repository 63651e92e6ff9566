#![deny(missing_docs)]

//! Core library for the document QA service.

/// HTTP routing and request handlers.
pub mod api;
/// Chat completion capability and provider adapters.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// PDF and JSON text extraction.
pub mod extraction;
/// Content fingerprints for partitions and chunks.
pub mod fingerprint;
/// Partitioned vector index abstraction and local store.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// QA activity counters.
pub mod metrics;
/// Document QA pipeline.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
