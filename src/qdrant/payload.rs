//! Mapping between chunks and Qdrant point payloads.

use crate::processing::types::{Chunk, ChunkId, Metadata};
use crate::qdrant::types::QdrantError;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const CHUNK_ID_FIELD: &str = "chunk_id";
const CONTENT_FIELD: &str = "content";
const METADATA_FIELD: &str = "metadata";
const INDEXED_AT_FIELD: &str = "indexed_at";

/// Build the payload object stored alongside each indexed chunk.
pub(crate) fn build_payload(id: &ChunkId, chunk: &Chunk, indexed_at: &str) -> Value {
    let mut payload = Map::new();
    payload.insert(CHUNK_ID_FIELD.into(), Value::String(id.to_string()));
    payload.insert(CONTENT_FIELD.into(), Value::String(chunk.content.clone()));
    payload.insert(
        METADATA_FIELD.into(),
        serde_json::to_value(&chunk.metadata).unwrap_or_else(|_| Value::Object(Map::new())),
    );
    payload.insert(INDEXED_AT_FIELD.into(), Value::String(indexed_at.to_string()));
    Value::Object(payload)
}

/// Rebuild a chunk from a stored payload.
pub(crate) fn chunk_from_payload(payload: &Map<String, Value>) -> Result<Chunk, QdrantError> {
    let content = payload
        .get(CONTENT_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| QdrantError::InvalidPayload(format!("missing '{CONTENT_FIELD}'")))?;
    let metadata: Metadata = match payload.get(METADATA_FIELD) {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|error| QdrantError::InvalidPayload(error.to_string()))?,
        None => Metadata::new(),
    };
    Ok(Chunk::new(content, metadata))
}

/// Point id for a chunk. Qdrant only accepts integers or UUIDs; a 32-hex chunk id maps onto a
/// UUID one-to-one and any other id is hashed into one.
pub(crate) fn point_id(id: &ChunkId) -> String {
    match Uuid::try_parse(id.as_str()) {
        Ok(uuid) => uuid.to_string(),
        Err(_) => {
            let digest = Sha256::digest(id.as_str().as_bytes());
            let mut bytes = [0_u8; 16];
            bytes.copy_from_slice(&digest[..16]);
            Uuid::from_bytes(bytes).to_string()
        }
    }
}
