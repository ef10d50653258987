//! Data types that flow through the indexing and retrieval pipeline.
//!
//! A [`Chunk`] is produced fresh by the chunker on every (re)index of a
//! document. Each chunk becomes exactly one [`IndexedVector`] whose
//! [`ChunkPayload`] carries enough document metadata to answer a query
//! without going back to the knowledge base.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload key holding the owning document id.
pub const PAYLOAD_DOCUMENT_ID: &str = "documentId";

/// Payload key holding the index generation that wrote the point.
pub const PAYLOAD_GENERATION: &str = "generation";

/// A bounded segment of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position, contiguous within one document.
    pub index: usize,
    pub content: String,
    /// Estimated token count (approximate, see [`crate::chunk::estimate_tokens`]).
    pub token_count: usize,
    /// SHA-256 of `content`, hex encoded.
    pub content_hash: String,
}

/// Metadata stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkPayload {
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: usize,
    pub chunk_content: String,
    #[serde(default)]
    pub token_count: usize,
    /// Identifier of the index run that wrote this point. Points of an
    /// older generation are stale once a newer run has completed.
    #[serde(default)]
    pub generation: String,
}

/// A vector ready to be upserted into a [`VectorIndex`](crate::index::VectorIndex).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

/// One ranked hit returned by a nearest-neighbour search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    /// Cosine similarity; higher is more relevant.
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Deterministic point id for a document chunk.
///
/// Re-indexing a document therefore overwrites its points in place
/// instead of accumulating new ones.
pub fn point_id(document_id: &str, chunk_index: usize) -> String {
    let name = format!("{}:{}", document_id, chunk_index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}
