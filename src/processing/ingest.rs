//! Idempotent ingestion of a document's chunks into its partition.
//!
//! The partition lock is held across the emptiness check and the write, so concurrent
//! ingestions of the same document perform exactly one write. A non-empty partition is never
//! rewritten.

use crate::embedding::{Embedder, EmbeddingClientError};
use crate::fingerprint::chunk_id;
use crate::index::{IndexError, IndexRecord, IndexStore, PartitionHandle};
use crate::processing::lock::PartitionLocks;
use crate::processing::types::{Chunk, IngestionError};
use std::sync::Arc;

/// Result of an ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Handle to the populated partition.
    pub partition: PartitionHandle,
    /// Number of chunks offered for ingestion.
    pub chunk_count: usize,
    /// Whether this call wrote the partition (false when it was already populated).
    pub written: bool,
}

/// Writes chunks into partitions at most once per partition.
pub struct IngestionCoordinator {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
    locks: Arc<PartitionLocks>,
}

impl IngestionCoordinator {
    /// Compose a coordinator from its capabilities.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        locks: Arc<PartitionLocks>,
    ) -> Self {
        Self {
            embedder,
            store,
            locks,
        }
    }

    /// Ensure `partition` holds `chunks`, embedding and writing them only if it is empty.
    pub async fn ingest(
        &self,
        partition: &str,
        chunks: Vec<Chunk>,
    ) -> Result<IngestOutcome, IngestionError> {
        if chunks.is_empty() {
            return Err(IngestionError::EmptyExtraction);
        }
        let chunk_count = chunks.len();
        let ids: Vec<_> = chunks.iter().map(chunk_id).collect();
        let unavailable = |source: IndexError| IngestionError::IndexUnavailable {
            partition: partition.to_string(),
            source,
        };

        let _guard = self.locks.acquire(partition).await?;

        let existing = self.store.count(partition).await.map_err(unavailable)?;
        if existing > 0 {
            tracing::info!(
                partition,
                existing,
                offered = chunk_count,
                "Partition already populated; skipping ingestion"
            );
            return Ok(IngestOutcome {
                partition: PartitionHandle::new(partition),
                chunk_count,
                written: false,
            });
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != chunk_count {
            return Err(IngestionError::Embedding(
                EmbeddingClientError::InvalidResponse(format!(
                    "expected {chunk_count} embeddings, got {}",
                    vectors.len()
                )),
            ));
        }

        let records = ids
            .into_iter()
            .zip(vectors)
            .zip(chunks)
            .map(|((id, vector), chunk)| IndexRecord { id, vector, chunk })
            .collect();
        self.store
            .add(partition, records)
            .await
            .map_err(unavailable)?;

        tracing::info!(partition, chunks = chunk_count, "Partition ingested");
        Ok(IngestOutcome {
            partition: PartitionHandle::new(partition),
            chunk_count,
            written: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::index::{LocalIndexStore, ScoredChunk};
    use crate::processing::lock::LockError;
    use crate::processing::types::{Metadata, MetadataValue};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Local store wrapper that counts `add` calls and yields inside them.
    struct RecordingStore {
        inner: LocalIndexStore,
        adds: AtomicUsize,
    }

    #[async_trait]
    impl IndexStore for RecordingStore {
        async fn count(&self, partition: &str) -> Result<usize, IndexError> {
            self.inner.count(partition).await
        }

        async fn add(&self, partition: &str, records: Vec<IndexRecord>) -> Result<(), IndexError> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.add(partition, records).await
        }

        async fn similarity_search(
            &self,
            partition: &str,
            query: &[f32],
            k: usize,
        ) -> Result<Vec<ScoredChunk>, IndexError> {
            self.inner.similarity_search(partition, query, k).await
        }
    }

    fn chunks() -> Vec<Chunk> {
        ["alpha beta", "gamma delta", "epsilon"]
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let mut metadata = Metadata::new();
                metadata.insert("page".into(), MetadataValue::from(index as i64 + 1));
                Chunk::new(*text, metadata)
            })
            .collect()
    }

    fn setup(dir: &TempDir) -> (Arc<RecordingStore>, IngestionCoordinator) {
        let store = Arc::new(RecordingStore {
            inner: LocalIndexStore::new(dir.path()),
            adds: AtomicUsize::new(0),
        });
        let coordinator = IngestionCoordinator::new(
            Arc::new(HashEmbedder::new(16)),
            store.clone(),
            Arc::new(PartitionLocks::new(dir.path(), Duration::from_secs(5))),
        );
        (store, coordinator)
    }

    #[tokio::test]
    async fn second_ingestion_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let (store, coordinator) = setup(&dir);

        let first = coordinator.ingest("doc_same", chunks()).await.unwrap();
        let second = coordinator.ingest("doc_same", chunks()).await.unwrap();

        assert!(first.written);
        assert!(!second.written);
        assert_eq!(first.partition, second.partition);
        assert_eq!(first.chunk_count, 3);
        assert_eq!(store.adds.load(Ordering::SeqCst), 1);
        assert_eq!(store.count("doc_same").await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ingestion_writes_once() {
        let dir = TempDir::new().unwrap();
        let (store, coordinator) = setup(&dir);
        let coordinator = Arc::new(coordinator);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.ingest("doc_race", chunks()).await })
            })
            .collect();

        let mut written = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().written {
                written += 1;
            }
        }

        assert_eq!(written, 1);
        assert_eq!(store.adds.load(Ordering::SeqCst), 1);
        assert_eq!(store.count("doc_race").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn empty_input_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (store, coordinator) = setup(&dir);
        let error = coordinator.ingest("doc_empty", Vec::new()).await.unwrap_err();
        assert!(matches!(error, IngestionError::EmptyExtraction));
        assert_eq!(store.adds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_surfaces_as_lock_unavailable() {
        let dir = TempDir::new().unwrap();
        let locks = Arc::new(PartitionLocks::new(dir.path(), Duration::from_millis(200)));
        let coordinator = IngestionCoordinator::new(
            Arc::new(HashEmbedder::new(16)),
            Arc::new(LocalIndexStore::new(dir.path())),
            locks.clone(),
        );

        let _held = locks.acquire("doc_busy").await.unwrap();
        let error = coordinator.ingest("doc_busy", chunks()).await.unwrap_err();
        assert!(matches!(
            error,
            IngestionError::LockUnavailable(LockError::Timeout { .. })
        ));
    }
}
