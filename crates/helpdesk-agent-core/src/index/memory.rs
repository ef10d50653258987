//! In-memory [`VectorIndex`] implementation for tests and local runs.
//!
//! Points live in a `Vec` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity over every stored point.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{IndexedVector, SearchResult};

use super::{CollectionInfo, PayloadFilter, VectorIndex};

/// In-memory vector index.
pub struct InMemoryVectorIndex {
    dims: RwLock<Option<usize>>,
    points: RwLock<Vec<IndexedVector>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            dims: RwLock::new(None),
            points: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Snapshot of every stored point, in insertion order.
    pub fn points(&self) -> Vec<IndexedVector> {
        self.read().clone()
    }

    /// Points belonging to one document, ordered by chunk index.
    pub fn document_points(&self, document_id: &str) -> Vec<IndexedVector> {
        let mut points: Vec<IndexedVector> = self
            .read()
            .iter()
            .filter(|p| p.payload.document_id == document_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| p.payload.chunk_index);
        points
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<IndexedVector>> {
        self.points.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<IndexedVector>> {
        self.points.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        let mut current = self.dims.write().unwrap_or_else(|e| e.into_inner());
        match *current {
            Some(existing) if existing != dims => {
                bail!(
                    "Collection already exists with {} dimensions, requested {}",
                    existing,
                    dims
                )
            }
            _ => *current = Some(dims),
        }
        Ok(())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let exists = self
            .dims
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        Ok(CollectionInfo {
            exists,
            points_count: self.len() as u64,
        })
    }

    async fn upsert(&self, points: &[IndexedVector]) -> Result<()> {
        let mut stored = self.write();
        for point in points {
            match stored.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point.clone(),
                None => stored.push(point.clone()),
            }
        }
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &PayloadFilter) -> Result<()> {
        let mut stored = self.write();
        stored.retain(|p| {
            let payload = serde_json::to_value(&p.payload).unwrap_or_default();
            !filter.matches(&payload)
        });
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let stored = self.read();
        let mut results: Vec<SearchResult> = stored
            .iter()
            .map(|p| SearchResult {
                id: p.id.clone(),
                score: cosine_similarity(vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|r| score_threshold.map_or(true, |t| r.score >= t))
            .collect();
        // stable: equal scores keep insertion order
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }
}
