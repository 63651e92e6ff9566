//! Deterministic content hashing for partitions and chunk identifiers.
//!
//! Both uses share one SHA-256 digest rendered as lowercase hex:
//!
//! - Partition names hash the raw uploaded bytes, so identical uploads always land in the same
//!   partition regardless of file name.
//! - Chunk ids hash the chunk content followed by its sorted metadata pairs and serve as the
//!   dedupe key inside a partition.

use crate::processing::types::{Chunk, ChunkId};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the document digest when naming a partition.
pub const PARTITION_FINGERPRINT_LEN: usize = 16;
/// Number of hex characters kept from the chunk digest when deriving a [`ChunkId`].
pub const CHUNK_ID_LEN: usize = 32;
/// Prefix applied to every partition name.
pub const PARTITION_PREFIX: &str = "doc_";

/// Compute the lowercase hex SHA-256 digest of `bytes`.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Derive the partition name for a raw document upload.
pub fn partition_name(document: &[u8]) -> String {
    let digest = fingerprint(document);
    format!("{PARTITION_PREFIX}{}", &digest[..PARTITION_FINGERPRINT_LEN])
}

/// Derive the stable identifier for a chunk from its content and metadata.
pub fn chunk_id(chunk: &Chunk) -> ChunkId {
    let mut material = String::with_capacity(chunk.content.len() + 64);
    material.push_str(&chunk.content);
    material.push_str(&chunk.metadata_signature());
    let digest = fingerprint(material.as_bytes());
    ChunkId::new(&digest[..CHUNK_ID_LEN])
}
