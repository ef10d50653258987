//! Keeps the vector index in step with published knowledge-base documents.
//!
//! # Index run
//!
//! Under a per-document lock:
//!
//! 1. Fetch the document; anything but `published` is a no-op.
//! 2. Chunk title + excerpt + body.
//! 3. No chunks: remove whatever is indexed for the document.
//! 4. Embed every chunk in one batch.
//! 5. Upsert the vectors tagged with a fresh generation id.
//! 6. Replace the document's `kb_chunks` rows in one transaction.
//! 7. Delete the document's vectors from older generations.
//!
//! Point ids are derived from `(document, chunk index)`, so step 5
//! overwrites unchanged positions in place and the previous vectors stay
//! searchable until the new ones are written. A failure at 4 leaves the
//! old index untouched. A failure at 5-7 is logged as a partial update
//! and returned; the next successful run repairs it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use helpdesk_agent_core::chunk::{chunk_text, ChunkOptions};
use helpdesk_agent_core::embedding::EmbeddingClient;
use helpdesk_agent_core::index::{PayloadFilter, VectorIndex};
use helpdesk_agent_core::models::{point_id, ChunkPayload, IndexedVector};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::error::IndexError;
use crate::kb::{DocumentSource, DocumentStatus};
use crate::progress::{ReindexProgress, ReindexTracker};

/// What an index run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { chunks: usize, generation: String },
    /// The document produced no chunks; its index was removed.
    Cleared,
    Skipped { status: DocumentStatus },
    NotFound,
}

/// One async mutex per document id.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    pub async fn acquire(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // drop entries nobody holds or waits on
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct Indexer {
    documents: Arc<dyn DocumentSource>,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    chunking: ChunkOptions,
    locks: DocumentLocks,
    progress: ReindexTracker,
}

impl Indexer {
    pub fn new(
        documents: Arc<dyn DocumentSource>,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        chunking: ChunkOptions,
    ) -> Self {
        Self {
            documents,
            embedder,
            index,
            chunking,
            locks: DocumentLocks::default(),
            progress: ReindexTracker::new(),
        }
    }

    /// Create the vector collection sized for the embedding model.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        self.index
            .ensure_collection(self.embedder.dims())
            .await
            .map_err(|e| IndexError::VectorIndex(format!("{:#}", e)))
    }

    pub async fn index_document(&self, id: &str) -> Result<IndexOutcome, IndexError> {
        let _guard = self.locks.acquire(id).await;

        let doc = match self.documents.fetch(id).await.map_err(IndexError::store)? {
            Some(doc) => doc,
            None => {
                tracing::debug!(document_id = %id, "document not found, nothing to index");
                return Ok(IndexOutcome::NotFound);
            }
        };
        if !doc.is_published() {
            tracing::debug!(document_id = %id, status = %doc.status, "document not published, skipping");
            return Ok(IndexOutcome::Skipped { status: doc.status });
        }

        let chunks = chunk_text(&doc.index_text(), &self.chunking);
        if chunks.is_empty() {
            self.remove_index(id).await?;
            tracing::info!(document_id = %id, "document has no text, index cleared");
            return Ok(IndexOutcome::Cleared);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| IndexError::Embedding(format!("{:#}", e)))?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::EmbeddingCount {
                expected: chunks.len(),
                got: vectors.len(),
            });
        }

        let generation = Uuid::new_v4().to_string();
        let points: Vec<IndexedVector> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedVector {
                id: point_id(&doc.id, chunk.index),
                vector,
                payload: ChunkPayload {
                    document_id: doc.id.clone(),
                    document_title: doc.title.clone(),
                    chunk_index: chunk.index,
                    chunk_content: chunk.content.clone(),
                    token_count: chunk.token_count,
                    generation: generation.clone(),
                },
            })
            .collect();

        if let Err(e) = self.index.upsert(&points).await {
            let err = IndexError::VectorIndex(format!("{:#}", e));
            warn_partial(id, &generation, "upsert", &err);
            return Err(err);
        }

        if let Err(e) = self
            .documents
            .replace_chunks(id, &chunks, &generation)
            .await
        {
            let err = IndexError::store(e);
            warn_partial(id, &generation, "chunk rows", &err);
            return Err(err);
        }

        if let Err(e) = self
            .index
            .delete_by_filter(&PayloadFilter::stale_generations(id, &generation))
            .await
        {
            let err = IndexError::StaleCleanup(format!("{:#}", e));
            warn_partial(id, &generation, "stale cleanup", &err);
            return Err(err);
        }

        tracing::info!(
            document_id = %id,
            chunks = chunks.len(),
            generation = %generation,
            "indexed document"
        );
        Ok(IndexOutcome::Indexed {
            chunks: chunks.len(),
            generation,
        })
    }

    /// Remove every vector and chunk row of a document. Safe when nothing
    /// is indexed.
    pub async fn delete_document_index(&self, id: &str) -> Result<(), IndexError> {
        let _guard = self.locks.acquire(id).await;
        self.remove_index(id).await?;
        tracing::info!(document_id = %id, "removed document index");
        Ok(())
    }

    async fn remove_index(&self, id: &str) -> Result<(), IndexError> {
        self.index
            .delete_by_filter(&PayloadFilter::document(id))
            .await
            .map_err(|e| IndexError::VectorIndex(format!("{:#}", e)))?;
        self.documents
            .delete_chunks(id)
            .await
            .map_err(IndexError::store)
    }

    /// Index every published document, counting failures instead of
    /// stopping at the first one.
    pub async fn reindex_all(&self) -> Result<ReindexProgress, IndexError> {
        let ids = self
            .documents
            .published_ids()
            .await
            .map_err(IndexError::store)?;
        self.progress.begin(ids.len() as u64)?;
        tracing::info!(total = ids.len(), "reindex started");

        for id in &ids {
            match self.index_document(id).await {
                Ok(_) => self.progress.record(true),
                Err(e) => {
                    tracing::warn!(document_id = %id, error = %e, "reindex of document failed");
                    self.progress.record(false);
                }
            }
        }

        let done = self.progress.finish();
        tracing::info!(
            processed = done.processed,
            succeeded = done.succeeded,
            failed = done.failed,
            "reindex finished"
        );
        Ok(done)
    }

    pub fn progress(&self) -> ReindexProgress {
        self.progress.snapshot()
    }
}

fn warn_partial(document_id: &str, generation: &str, step: &str, err: &IndexError) {
    tracing::warn!(
        document_id = %document_id,
        generation = %generation,
        step,
        error = %err,
        "index run failed midway, document is partially updated until the next successful run"
    );
}
