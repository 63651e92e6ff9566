//! [`IndexStore`] adapter mapping each partition onto its own Qdrant collection.

use crate::index::{
    IndexError, IndexRecord, IndexStore, ScoredChunk, current_timestamp_rfc3339,
    validate_partition_name,
};
use crate::qdrant::{
    client::QdrantService,
    payload::{build_payload, chunk_from_payload, point_id},
    types::QdrantError,
};
use async_trait::async_trait;
use serde_json::json;

/// Index store backed by a Qdrant server.
#[derive(Debug, Clone)]
pub struct QdrantIndexStore {
    service: QdrantService,
}

impl QdrantIndexStore {
    /// Wrap an initialized Qdrant client.
    pub fn new(service: QdrantService) -> Self {
        Self { service }
    }

    /// Connect to the Qdrant instance at `url`.
    pub fn connect(url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        Ok(Self::new(QdrantService::new(url, api_key)?))
    }
}

#[async_trait]
impl IndexStore for QdrantIndexStore {
    async fn count(&self, partition: &str) -> Result<usize, IndexError> {
        validate_partition_name(partition)?;
        Ok(self.service.count_points(partition).await?)
    }

    async fn add(&self, partition: &str, records: Vec<IndexRecord>) -> Result<(), IndexError> {
        validate_partition_name(partition)?;
        let Some(first) = records.first() else {
            return Ok(());
        };
        let dimension = first.vector.len();
        if let Some(mismatch) = records.iter().find(|record| record.vector.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: mismatch.vector.len(),
            });
        }

        self.service
            .create_collection_if_not_exists(partition, dimension as u64)
            .await?;

        let indexed_at = current_timestamp_rfc3339();
        let points = records
            .iter()
            .map(|record| {
                json!({
                    "id": point_id(&record.id),
                    "vector": record.vector,
                    "payload": build_payload(&record.id, &record.chunk, &indexed_at),
                })
            })
            .collect();
        let written = self.service.upsert_points(partition, points).await?;
        tracing::debug!(partition, written, dimension, "Partition written to Qdrant");
        Ok(())
    }

    async fn similarity_search(
        &self,
        partition: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        validate_partition_name(partition)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let points = self.service.query_points(partition, query, k).await?;
        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let Some(payload) = point.payload.as_ref() else {
                tracing::warn!(partition, id = %point.id, "Skipping point without payload");
                continue;
            };
            hits.push(ScoredChunk {
                chunk: chunk_from_payload(payload)?,
                score: point.score,
            });
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(hits)
    }
}
