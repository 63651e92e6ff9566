//! Qdrant vector store integration: one collection per partition over the HTTP API.

pub mod client;
pub mod payload;
pub mod store;
pub mod types;

pub use client::QdrantService;
pub use store::QdrantIndexStore;
pub use types::{QdrantError, ScoredPoint};
