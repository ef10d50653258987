//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait covers everything the indexer and retriever
//! need from a nearest-neighbour store: collection bootstrap, upsert,
//! delete by payload filter, and cosine search. The production backend
//! is Qdrant (in the app crate); [`memory::InMemoryVectorIndex`] backs
//! tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::models::{IndexedVector, SearchResult, PAYLOAD_DOCUMENT_ID, PAYLOAD_GENERATION};

/// Exact-match condition on one payload key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMatch {
    pub key: String,
    pub value: Value,
}

impl FieldMatch {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Conjunction of payload conditions.
///
/// A point matches when every `must` condition holds and no `must_not`
/// condition holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PayloadFilter {
    pub must: Vec<FieldMatch>,
    pub must_not: Vec<FieldMatch>,
}

impl PayloadFilter {
    /// Every point of one document.
    pub fn document(document_id: &str) -> Self {
        Self {
            must: vec![FieldMatch::new(PAYLOAD_DOCUMENT_ID, document_id)],
            must_not: Vec::new(),
        }
    }

    /// Points of one document written by any generation except `generation`.
    pub fn stale_generations(document_id: &str, generation: &str) -> Self {
        Self {
            must: vec![FieldMatch::new(PAYLOAD_DOCUMENT_ID, document_id)],
            must_not: vec![FieldMatch::new(PAYLOAD_GENERATION, generation)],
        }
    }

    /// Evaluate the filter against a JSON payload.
    pub fn matches(&self, payload: &Value) -> bool {
        let holds = |m: &FieldMatch| payload.get(&m.key) == Some(&m.value);
        self.must.iter().all(holds) && !self.must_not.iter().any(holds)
    }
}

/// Collection status as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectionInfo {
    pub exists: bool,
    pub points_count: u64,
}

/// Abstract nearest-neighbour store keyed by point id.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorIndex::ensure_collection) | Create the collection if absent |
/// | [`collection_info`](VectorIndex::collection_info) | Existence and point count |
/// | [`upsert`](VectorIndex::upsert) | Insert or overwrite points by id |
/// | [`delete_by_filter`](VectorIndex::delete_by_filter) | Remove points matching a payload filter |
/// | [`search`](VectorIndex::search) | Cosine search, best first |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection with cosine distance if it does not exist.
    async fn ensure_collection(&self, dims: usize) -> Result<()>;

    async fn collection_info(&self) -> Result<CollectionInfo>;

    /// Insert points, replacing any existing point with the same id.
    async fn upsert(&self, points: &[IndexedVector]) -> Result<()>;

    /// Remove every point whose payload matches `filter`. Matching nothing
    /// is not an error.
    async fn delete_by_filter(&self, filter: &PayloadFilter) -> Result<()>;

    /// Return at most `limit` points ordered by descending similarity,
    /// dropping any that score below `score_threshold`.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_filter() {
        let f = PayloadFilter::document("d1");
        assert!(f.matches(&json!({"documentId": "d1", "generation": "a"})));
        assert!(!f.matches(&json!({"documentId": "d2"})));
        assert!(!f.matches(&json!({})));
    }

    #[test]
    fn test_stale_generation_filter() {
        let f = PayloadFilter::stale_generations("d1", "new");
        assert!(f.matches(&json!({"documentId": "d1", "generation": "old"})));
        assert!(f.matches(&json!({"documentId": "d1"})));
        assert!(!f.matches(&json!({"documentId": "d1", "generation": "new"})));
        assert!(!f.matches(&json!({"documentId": "d2", "generation": "old"})));
    }
}
