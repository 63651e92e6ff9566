//! File-backed index store: one JSON document per partition under the index directory.
//!
//! This is a brute-force fallback for offline runs and tests; deployments use the Qdrant
//! backend. Writes go to a temporary sibling file that is renamed into place, so readers in
//! other processes never observe a half-written partition. Only non-empty partitions are cached
//! in memory; an empty or missing partition is always re-read from disk because another process
//! may have populated it since.
//!
//! Writers to one partition must be serialised by the caller (ingestion holds the partition
//! lock). The cache guard is only taken to swap in the merged result, so searches on other
//! partitions never wait on file I/O.

use crate::index::{
    IndexError, IndexRecord, IndexStore, ScoredChunk, cosine_similarity, current_timestamp_rfc3339,
    validate_partition_name,
};
use crate::processing::types::ChunkId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

const PARTITION_FILE_EXTENSION: &str = "json";

#[derive(Debug, Deserialize)]
struct PartitionFile {
    records: Vec<IndexRecord>,
}

/// Index store persisting partitions as JSON files.
#[derive(Debug)]
pub struct LocalIndexStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, Arc<Vec<IndexRecord>>>>,
}

impl LocalIndexStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Directory holding partition files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `partition`.
    pub fn partition_path(&self, partition: &str) -> PathBuf {
        self.root.join(format!("{partition}.{PARTITION_FILE_EXTENSION}"))
    }

    async fn load(&self, partition: &str) -> Result<Arc<Vec<IndexRecord>>, IndexError> {
        validate_partition_name(partition)?;
        if let Some(records) = self.cache.read().await.get(partition) {
            return Ok(records.clone());
        }

        let records = Arc::new(self.read_partition_file(partition).await?);
        if !records.is_empty() {
            self.cache
                .write()
                .await
                .insert(partition.to_string(), records.clone());
        }
        Ok(records)
    }

    async fn read_partition_file(&self, partition: &str) -> Result<Vec<IndexRecord>, IndexError> {
        let path = self.partition_path(partition);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(IndexError::Io { path, source }),
        };
        let file: PartitionFile = serde_json::from_slice(&bytes)
            .map_err(|source| IndexError::Corrupt {
                path: path.clone(),
                source,
            })?;
        Ok(file.records)
    }

    async fn write_partition_file(
        &self,
        partition: &str,
        records: &[IndexRecord],
    ) -> Result<(), IndexError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| IndexError::Io {
                path: self.root.clone(),
                source,
            })?;

        let path = self.partition_path(partition);
        let file = PartitionFileRef {
            partition,
            updated_at: current_timestamp_rfc3339(),
            records,
        };
        let encoded = serde_json::to_vec(&file).map_err(|source| IndexError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let temp_path = self.root.join(format!(
            ".{partition}.{}.tmp",
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&temp_path, &encoded)
            .await
            .map_err(|source| IndexError::Io {
                path: temp_path.clone(),
                source,
            })?;
        if let Err(source) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(IndexError::Io { path, source });
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PartitionFileRef<'a> {
    partition: &'a str,
    updated_at: String,
    records: &'a [IndexRecord],
}

#[async_trait]
impl IndexStore for LocalIndexStore {
    async fn count(&self, partition: &str) -> Result<usize, IndexError> {
        Ok(self.load(partition).await?.len())
    }

    async fn add(&self, partition: &str, records: Vec<IndexRecord>) -> Result<(), IndexError> {
        validate_partition_name(partition)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut merged = self.read_partition_file(partition).await?;
        let mut positions: HashMap<ChunkId, usize> = merged
            .iter()
            .enumerate()
            .map(|(index, existing)| (existing.id.clone(), index))
            .collect();
        let added = records.len();
        for record in records {
            match positions.get(&record.id) {
                Some(&index) => merged[index] = record,
                None => {
                    positions.insert(record.id.clone(), merged.len());
                    merged.push(record);
                }
            }
        }

        self.write_partition_file(partition, &merged).await?;
        tracing::debug!(
            partition,
            added,
            total = merged.len(),
            path = %self.partition_path(partition).display(),
            "Partition written"
        );
        self.cache
            .write()
            .await
            .insert(partition.to_string(), Arc::new(merged));
        Ok(())
    }

    async fn similarity_search(
        &self,
        partition: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let records = self.load(partition).await?;
        if records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = Vec::with_capacity(records.len());
        for record in records.iter() {
            if record.vector.len() != query.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: record.vector.len(),
                    actual: query.len(),
                });
            }
            scored.push(ScoredChunk {
                chunk: record.chunk.clone(),
                score: cosine_similarity(&record.vector, query),
            });
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::chunk_id;
    use crate::processing::types::{Chunk, Metadata, MetadataValue};
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(content: &str, page: i64, vector: Vec<f32>) -> IndexRecord {
        let mut metadata = Metadata::new();
        metadata.insert("page".into(), MetadataValue::from(page));
        let chunk = Chunk::new(content, metadata);
        IndexRecord {
            id: chunk_id(&chunk),
            vector,
            chunk,
        }
    }

    #[tokio::test]
    async fn missing_partition_counts_zero() {
        let dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(dir.path());
        assert_eq!(store.count("doc_missing").await.unwrap(), 0);
        assert!(
            store
                .similarity_search("doc_missing", &[1.0, 0.0], 4)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(dir.path());
        store
            .add(
                "doc_rank",
                vec![
                    record("east", 1, vec![1.0, 0.0]),
                    record("north", 2, vec![0.0, 1.0]),
                    record("north-east", 3, vec![0.7, 0.7]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .similarity_search("doc_rank", &[1.0, 0.1], 2)
            .await
            .unwrap();
        let contents: Vec<&str> = hits.iter().map(|hit| hit.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["east", "north-east"]);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn partitions_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let store = LocalIndexStore::new(dir.path());
            store
                .add("doc_persist", vec![record("kept", 1, vec![0.5, 0.5])])
                .await
                .unwrap();
        }

        let reopened = LocalIndexStore::new(dir.path());
        assert_eq!(reopened.count("doc_persist").await.unwrap(), 1);
        let hits = reopened
            .similarity_search("doc_persist", &[0.5, 0.5], 4)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.content, "kept");
        assert_eq!(hits[0].chunk.page(), Some(1));
    }

    #[tokio::test]
    async fn re_adding_same_ids_does_not_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(dir.path());
        let batch = vec![record("one", 1, vec![1.0]), record("two", 1, vec![0.5])];
        store.add("doc_dupe", batch.clone()).await.unwrap();
        store.add("doc_dupe", batch).await.unwrap();
        assert_eq!(store.count("doc_dupe").await.unwrap(), 2);

        store
            .add(
                "doc_dupe",
                vec![record("two", 1, vec![-1.0]), record("three", 2, vec![0.25])],
            )
            .await
            .unwrap();
        let reopened = LocalIndexStore::new(dir.path());
        let hits = reopened
            .similarity_search("doc_dupe", &[1.0], 10)
            .await
            .unwrap();
        let contents: Vec<&str> = hits.iter().map(|hit| hit.chunk.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "three", "two"]);
    }

    #[tokio::test]
    async fn writes_proceed_while_other_partitions_are_being_read() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalIndexStore::new(dir.path()));
        store
            .add("doc_a", vec![record("alpha", 1, vec![1.0, 0.0])])
            .await
            .unwrap();

        let readers = store.cache.read().await;
        let writer = tokio::spawn({
            let store = store.clone();
            async move {
                store
                    .add("doc_b", vec![record("beta", 1, vec![0.0, 1.0])])
                    .await
            }
        });

        let written = store.partition_path("doc_b");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !written.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("doc_b persisted while doc_a readers held the cache");
        assert!(readers.contains_key("doc_a"));
        drop(readers);

        writer.await.unwrap().unwrap();
        assert_eq!(store.count("doc_b").await.unwrap(), 1);
        let hits = store
            .similarity_search("doc_a", &[1.0, 0.0], 1)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.content, "alpha");
    }

    #[tokio::test]
    async fn partitions_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(dir.path());
        store
            .add("doc_a", vec![record("alpha", 1, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count("doc_b").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sees_partitions_written_by_another_instance() {
        let dir = TempDir::new().unwrap();
        let first = LocalIndexStore::new(dir.path());
        let second = LocalIndexStore::new(dir.path());

        assert_eq!(first.count("doc_shared").await.unwrap(), 0);
        second
            .add("doc_shared", vec![record("late", 1, vec![1.0])])
            .await
            .unwrap();
        assert_eq!(first.count("doc_shared").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(dir.path());
        store
            .add("doc_dims", vec![record("x", 1, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        let error = store
            .similarity_search("doc_dims", &[1.0, 0.0], 1)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn corrupt_partition_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(dir.path());
        std::fs::write(store.partition_path("doc_bad"), b"{oops").unwrap();
        assert!(matches!(
            store.count("doc_bad").await.unwrap_err(),
            IndexError::Corrupt { .. }
        ));
    }

    #[tokio::test]
    async fn rejects_path_like_partition_names() {
        let dir = TempDir::new().unwrap();
        let store = LocalIndexStore::new(dir.path());
        assert!(matches!(
            store.count("../etc").await.unwrap_err(),
            IndexError::InvalidPartition(_)
        ));
    }
}
