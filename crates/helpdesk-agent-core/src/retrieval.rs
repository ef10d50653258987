//! Query-time retrieval: embed a question, search the vector index, and
//! assemble the hits into a context block for the language model.
//!
//! The retriever never re-orders what the index returns. Ranking and
//! tie-breaking belong to the [`VectorIndex`] implementation.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::embedding::{embed_one, EmbeddingClient};
use crate::index::VectorIndex;
use crate::models::SearchResult;

/// Default result count and minimum similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrieverSettings {
    pub limit: usize,
    pub score_threshold: f32,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            limit: 5,
            score_threshold: 0.3,
        }
    }
}

/// A document that contributed at least one chunk to a context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub title: String,
    /// Score of the document's first (best) chunk.
    pub score: f32,
}

/// Output of [`Retriever::search_with_context`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievedContext {
    /// Every returned chunk as `"[<title>]\n<content>"`, blank-line separated.
    pub context: String,
    /// One entry per distinct document, in first-seen order.
    pub sources: Vec<SourceRef>,
    pub results: Vec<SearchResult>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

pub struct Retriever {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    settings: RetrieverSettings,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        settings: RetrieverSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            settings,
        }
    }

    pub fn settings(&self) -> RetrieverSettings {
        self.settings
    }

    /// Nearest chunks for `query`, best first.
    ///
    /// A blank query returns no results without calling the embedder.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let vector = embed_one(self.embedder.as_ref(), query).await?;
        self.index
            .search(&vector, limit, Some(score_threshold))
            .await
    }

    /// Search with the configured threshold and build a context block.
    pub async fn search_with_context(&self, query: &str, limit: usize) -> Result<RetrievedContext> {
        let results = self
            .search(query, limit, self.settings.score_threshold)
            .await?;
        Ok(build_context(results))
    }
}

/// Join results into a context string and a deduplicated source list.
pub fn build_context(results: Vec<SearchResult>) -> RetrievedContext {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    let mut blocks = Vec::with_capacity(results.len());

    for r in &results {
        blocks.push(format!(
            "[{}]\n{}",
            r.payload.document_title, r.payload.chunk_content
        ));
        if seen.insert(r.payload.document_id.as_str()) {
            sources.push(SourceRef {
                document_id: r.payload.document_id.clone(),
                title: r.payload.document_title.clone(),
                score: r.score,
            });
        }
    }

    RetrievedContext {
        context: blocks.join("\n\n"),
        sources,
        results,
    }
}
