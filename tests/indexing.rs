mod common;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{article, test_db, HashEmbedder, TestDb};
use helpdesk_agent::error::IndexError;
use helpdesk_agent::indexer::{IndexOutcome, Indexer};
use helpdesk_agent::kb::{DocumentSource, DocumentStatus, KbDocument, NewDocument};
use helpdesk_agent::lifecycle::{edit_document, remove_document, DocumentEdit};
use helpdesk_agent::queue::{IndexJob, IndexQueue, JobResult};
use helpdesk_agent_core::chunk::ChunkOptions;
use helpdesk_agent_core::index::memory::InMemoryVectorIndex;
use helpdesk_agent_core::index::{CollectionInfo, PayloadFilter, VectorIndex};
use helpdesk_agent_core::models::{IndexedVector, SearchResult};

/// Wraps the in-memory index and can be told to reject upserts or deletes.
struct FlakyIndex {
    inner: InMemoryVectorIndex,
    fail_upsert: AtomicBool,
    fail_delete: AtomicBool,
}

impl FlakyIndex {
    fn new() -> Self {
        Self {
            inner: InMemoryVectorIndex::new(),
            fail_upsert: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        self.inner.ensure_collection(dims).await
    }
    async fn collection_info(&self) -> Result<CollectionInfo> {
        self.inner.collection_info().await
    }
    async fn upsert(&self, points: &[IndexedVector]) -> Result<()> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            bail!("qdrant unavailable");
        }
        self.inner.upsert(points).await
    }
    async fn delete_by_filter(&self, filter: &PayloadFilter) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            bail!("qdrant unavailable");
        }
        self.inner.delete_by_filter(filter).await
    }
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        self.inner.search(vector, limit, score_threshold).await
    }
}

struct Setup {
    db: TestDb,
    embedder: Arc<HashEmbedder>,
    index: Arc<InMemoryVectorIndex>,
    indexer: Arc<Indexer>,
}

fn options() -> ChunkOptions {
    ChunkOptions {
        max_tokens: 120,
        overlap_tokens: 30,
        min_chunk_size: 10,
    }
}

async fn setup_with(embedder: HashEmbedder, chunking: ChunkOptions) -> Setup {
    let db = test_db().await;
    let embedder = Arc::new(embedder);
    let index = Arc::new(InMemoryVectorIndex::new());
    let indexer = Arc::new(Indexer::new(
        db.kb.clone(),
        embedder.clone(),
        index.clone(),
        chunking,
    ));
    indexer.ensure_collection().await.unwrap();
    Setup {
        db,
        embedder,
        index,
        indexer,
    }
}

async fn setup() -> Setup {
    setup_with(HashEmbedder::new(), options()).await
}

async fn add(db: &TestDb, title: &str, body: &str, status: DocumentStatus) -> KbDocument {
    db.kb
        .create(NewDocument {
            title: title.to_string(),
            excerpt: String::new(),
            body: body.to_string(),
            status,
        })
        .await
        .unwrap()
}

fn contents(points: &[IndexedVector]) -> Vec<(usize, String)> {
    points
        .iter()
        .map(|p| (p.payload.chunk_index, p.payload.chunk_content.clone()))
        .collect()
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let s = setup().await;
    let doc = add(&s.db, "Refunds", &article("refunds", 20), DocumentStatus::Published).await;

    let first = s.indexer.index_document(&doc.id).await.unwrap();
    let after_first = s.index.document_points(&doc.id);
    let second = s.indexer.index_document(&doc.id).await.unwrap();
    let after_second = s.index.document_points(&doc.id);

    let (IndexOutcome::Indexed { chunks: n1, generation: g1 }, IndexOutcome::Indexed { chunks: n2, generation: g2 }) =
        (first, second)
    else {
        panic!("both runs should index");
    };
    assert!(n1 > 1);
    assert_eq!(n1, n2);
    assert_ne!(g1, g2);
    assert_eq!(after_first.len(), n1);
    assert_eq!(s.index.len(), n2);
    assert_eq!(contents(&after_first), contents(&after_second));
    assert!(after_second.iter().all(|p| p.payload.generation == g2));

    let rows = s.db.kb.chunks(&doc.id).await.unwrap();
    assert_eq!(rows.len(), n2);
    assert!(rows.iter().all(|r| r.generation == g2));
    let indices: Vec<i64> = rows.iter().map(|r| r.chunk_index).collect();
    assert_eq!(indices, (0..n2 as i64).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_unpublished_document_is_not_indexed() {
    let s = setup().await;
    let doc = add(&s.db, "Draft", "Not ready yet.", DocumentStatus::Draft).await;

    let outcome = s.indexer.index_document(&doc.id).await.unwrap();
    assert_eq!(
        outcome,
        IndexOutcome::Skipped {
            status: DocumentStatus::Draft
        }
    );
    assert!(s.index.is_empty());
    assert_eq!(s.embedder.calls.load(Ordering::SeqCst), 0);

    let missing = s.indexer.index_document("no-such-id").await.unwrap();
    assert_eq!(missing, IndexOutcome::NotFound);
}

#[tokio::test]
async fn test_delete_document_index() {
    let s = setup().await;
    let keep = add(&s.db, "Shipping", &article("shipping", 5), DocumentStatus::Published).await;
    let drop = add(&s.db, "Returns", &article("returns", 5), DocumentStatus::Published).await;
    s.indexer.index_document(&keep.id).await.unwrap();
    s.indexer.index_document(&drop.id).await.unwrap();

    s.indexer.delete_document_index(&drop.id).await.unwrap();
    assert!(s.index.document_points(&drop.id).is_empty());
    assert!(s.db.kb.chunks(&drop.id).await.unwrap().is_empty());
    assert!(!s.index.document_points(&keep.id).is_empty());

    // nothing left to delete
    s.indexer.delete_document_index(&drop.id).await.unwrap();
}

#[tokio::test]
async fn test_shrinking_document_removes_stale_chunks() {
    let s = setup().await;
    let doc = add(&s.db, "Billing", &article("billing", 20), DocumentStatus::Published).await;
    s.indexer.index_document(&doc.id).await.unwrap();
    assert!(s.index.document_points(&doc.id).len() > 1);

    s.db
        .kb
        .update_content(&doc.id, "Billing", "", "Invoices are emailed monthly.")
        .await
        .unwrap();
    s.indexer.index_document(&doc.id).await.unwrap();

    let points = s.index.document_points(&doc.id);
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].payload.chunk_index, 0);
    assert!(points[0].payload.chunk_content.contains("Invoices"));
}

#[tokio::test]
async fn test_empty_document_clears_index() {
    let s = setup().await;
    let doc = add(&s.db, "Temp", &article("temp", 3), DocumentStatus::Published).await;
    s.indexer.index_document(&doc.id).await.unwrap();

    // title is required, so empty it through markup only
    s.db
        .kb
        .update_content(&doc.id, "<br>", "", "<script>track()</script>")
        .await
        .unwrap();
    let outcome = s.indexer.index_document(&doc.id).await.unwrap();
    assert_eq!(outcome, IndexOutcome::Cleared);
    assert!(s.index.document_points(&doc.id).is_empty());
    assert!(s.db.kb.chunks(&doc.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_embedding_keeps_previous_vectors() {
    let s = setup().await;
    let doc = add(&s.db, "Passwords", &article("password reset", 10), DocumentStatus::Published).await;
    s.indexer.index_document(&doc.id).await.unwrap();
    let before = s.index.document_points(&doc.id);

    s.db
        .kb
        .update_content(&doc.id, "Passwords", "", &article("account recovery", 10))
        .await
        .unwrap();
    s.embedder.set_failing(true);
    let err = s.indexer.index_document(&doc.id).await.unwrap_err();
    assert!(matches!(err, IndexError::Embedding(_)));

    assert_eq!(contents(&s.index.document_points(&doc.id)), contents(&before));
    assert_eq!(s.db.kb.chunks(&doc.id).await.unwrap().len(), before.len());
}

#[tokio::test]
async fn test_failed_upsert_keeps_previous_vectors() {
    let db = test_db().await;
    let index = Arc::new(FlakyIndex::new());
    let indexer = Indexer::new(
        db.kb.clone(),
        Arc::new(HashEmbedder::new()),
        index.clone(),
        options(),
    );
    let doc = add(&db, "Plans", &article("plans", 10), DocumentStatus::Published).await;
    indexer.index_document(&doc.id).await.unwrap();
    let before = index.inner.document_points(&doc.id);

    index.fail_upsert.store(true, Ordering::SeqCst);
    let err = indexer.index_document(&doc.id).await.unwrap_err();
    assert!(matches!(err, IndexError::VectorIndex(_)));
    assert_eq!(index.inner.document_points(&doc.id), before);
}

#[tokio::test]
async fn test_concurrent_runs_on_one_document_do_not_interleave() {
    let s = setup().await;
    let doc = add(&s.db, "Accounts", &article("accounts", 15), DocumentStatus::Published).await;

    let (a, b) = tokio::join!(
        s.indexer.index_document(&doc.id),
        s.indexer.index_document(&doc.id)
    );
    a.unwrap();
    b.unwrap();

    let rows = s.db.kb.chunks(&doc.id).await.unwrap();
    let points = s.index.document_points(&doc.id);
    assert_eq!(rows.len(), points.len());
    let generation = &rows[0].generation;
    assert!(points.iter().all(|p| &p.payload.generation == generation));
}

#[tokio::test]
async fn test_3000_char_article_scenario() {
    let s = setup_with(
        HashEmbedder::new(),
        ChunkOptions {
            max_tokens: 500,
            overlap_tokens: 50,
            min_chunk_size: 20,
        },
    )
    .await;
    let body = article("refunds", 33);
    assert!(body.len() >= 3000, "article is {} chars", body.len());
    let doc = add(&s.db, "Refunds", &body, DocumentStatus::Published).await;

    s.indexer.index_document(&doc.id).await.unwrap();
    let rows = s.db.kb.chunks(&doc.id).await.unwrap();
    assert!(rows.len() >= 2);
    for row in &rows {
        assert!(row.token_count <= 500, "chunk {} has {} tokens", row.chunk_index, row.token_count);
    }
    for pair in rows.windows(2) {
        let last_sentence = pair[0].content.rsplit(". ").next().unwrap();
        assert!(!last_sentence.is_empty());
        assert!(
            pair[1].content.contains(last_sentence),
            "chunk {} does not repeat the tail of chunk {}",
            pair[1].chunk_index,
            pair[0].chunk_index
        );
    }
}

#[tokio::test]
async fn test_reindex_all_counts_failures() {
    let s = setup_with(HashEmbedder::poisoned_by("POISON"), options()).await;
    add(&s.db, "Good", &article("good", 4), DocumentStatus::Published).await;
    add(&s.db, "Bad", "This text contains POISON.", DocumentStatus::Published).await;
    add(&s.db, "Draft", &article("draft", 4), DocumentStatus::Draft).await;

    let progress = s.indexer.reindex_all().await.unwrap();
    assert!(!progress.running);
    assert_eq!(progress.total, 2);
    assert_eq!(progress.processed, 2);
    assert_eq!(progress.succeeded, 1);
    assert_eq!(progress.failed, 1);
    assert!(progress.finished_at.is_some());
    assert_eq!(s.indexer.progress(), progress);
}

#[tokio::test]
async fn test_queue_runs_jobs_in_background() {
    let s = setup().await;
    let doc = add(&s.db, "FAQ", &article("faq", 6), DocumentStatus::Published).await;
    let queue = IndexQueue::start(s.indexer.clone(), 2, 8);

    let handle = queue.submit(IndexJob::Index(doc.id.clone())).await.unwrap();
    let result = handle.wait().await.unwrap();
    assert!(matches!(result, JobResult::Indexed(IndexOutcome::Indexed { .. })));
    assert!(!s.index.document_points(&doc.id).is_empty());

    let handle = queue.try_submit(IndexJob::Delete(doc.id.clone())).unwrap();
    assert_eq!(handle.wait().await.unwrap(), JobResult::Deleted);
    assert!(s.index.document_points(&doc.id).is_empty());

    // a dropped handle does not stop the job
    drop(queue.submit(IndexJob::Index(doc.id.clone())).await.unwrap());
    queue.shutdown().await;
    assert!(!s.index.document_points(&doc.id).is_empty());
}

#[tokio::test]
async fn test_editing_published_document_reindexes_it() {
    let s = setup().await;
    let doc = add(&s.db, "Returns", &article("returns", 6), DocumentStatus::Published).await;
    let queue = IndexQueue::start(s.indexer.clone(), 1, 4);
    s.indexer.index_document(&doc.id).await.unwrap();

    let handle = edit_document(
        &s.db.kb,
        &queue,
        &doc.id,
        DocumentEdit {
            body: Some("Returns are free within thirty days.".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap()
    .expect("published documents are reindexed");
    assert!(matches!(
        handle.wait().await.unwrap(),
        JobResult::Indexed(IndexOutcome::Indexed { chunks: 1, .. })
    ));

    let points = s.index.document_points(&doc.id);
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].payload.chunk_content, "Returns Returns are free within thirty days.");
    assert_eq!(s.db.kb.fetch(&doc.id).await.unwrap().unwrap().title, "Returns");
    queue.shutdown().await;
}

#[tokio::test]
async fn test_editing_draft_does_not_index() {
    let s = setup().await;
    let doc = add(&s.db, "Draft", "Work in progress.", DocumentStatus::Draft).await;
    let queue = IndexQueue::start(s.indexer.clone(), 1, 4);

    let handle = edit_document(
        &s.db.kb,
        &queue,
        &doc.id,
        DocumentEdit {
            title: Some("Shipping".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(handle.is_none());
    assert!(s.index.points().is_empty());
    assert_eq!(s.db.kb.fetch(&doc.id).await.unwrap().unwrap().title, "Shipping");

    assert!(edit_document(&s.db.kb, &queue, "missing", DocumentEdit::default())
        .await
        .is_err());
    queue.shutdown().await;
}

#[tokio::test]
async fn test_removing_document_drops_its_vectors() {
    let s = setup().await;
    let keep = add(&s.db, "Shipping", &article("shipping", 5), DocumentStatus::Published).await;
    let gone = add(&s.db, "Returns", &article("returns", 5), DocumentStatus::Published).await;
    s.indexer.index_document(&keep.id).await.unwrap();
    s.indexer.index_document(&gone.id).await.unwrap();
    let queue = IndexQueue::start(s.indexer.clone(), 1, 4);

    remove_document(&s.db.kb, &queue, &gone.id).await.unwrap();
    assert!(s.index.document_points(&gone.id).is_empty());
    assert!(s.db.kb.fetch(&gone.id).await.unwrap().is_none());
    assert!(s.db.kb.chunks(&gone.id).await.unwrap().is_empty());
    assert!(!s.index.document_points(&keep.id).is_empty());

    let err = remove_document(&s.db.kb, &queue, &gone.id).await.unwrap_err();
    assert!(err.to_string().contains("not found"), "{}", err);
    queue.shutdown().await;
}

#[tokio::test]
async fn test_document_kept_when_its_index_cannot_be_removed() {
    let db = test_db().await;
    let index = Arc::new(FlakyIndex::new());
    let indexer = Arc::new(Indexer::new(
        db.kb.clone(),
        Arc::new(HashEmbedder::new()),
        index.clone(),
        options(),
    ));
    let doc = add(&db, "Returns", &article("returns", 5), DocumentStatus::Published).await;
    indexer.index_document(&doc.id).await.unwrap();
    let queue = IndexQueue::start(indexer, 1, 4);

    index.fail_delete.store(true, Ordering::SeqCst);
    assert!(remove_document(&db.kb, &queue, &doc.id).await.is_err());
    assert!(db.kb.fetch(&doc.id).await.unwrap().is_some());
    assert!(!index.inner.document_points(&doc.id).is_empty());
    queue.shutdown().await;
}
