//! Document edits and removals together with their index side effects.
//!
//! Editing a published document queues a reindex. Removing a document
//! drops its vectors before the row goes away, so no points are left
//! pointing at a missing document.

use anyhow::{bail, Result};

use crate::kb::{DocumentSource, SqliteKnowledgeBase};
use crate::queue::{IndexJob, IndexQueue, JobHandle};

/// Changes to an existing document. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentEdit {
    pub title: Option<String>,
    pub excerpt: Option<String>,
    pub body: Option<String>,
}

impl DocumentEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.excerpt.is_none() && self.body.is_none()
    }
}

/// Apply `edit` and queue a reindex when the document is published.
///
/// Returns the handle of the queued job, or `None` for a document that is
/// not indexed.
pub async fn edit_document(
    kb: &SqliteKnowledgeBase,
    queue: &IndexQueue,
    id: &str,
    edit: DocumentEdit,
) -> Result<Option<JobHandle>> {
    let Some(doc) = kb.fetch(id).await? else {
        bail!("document {} not found", id);
    };
    if edit.is_empty() {
        bail!("nothing to change; pass --title, --excerpt or --body-file");
    }

    let published = doc.is_published();
    let title = edit.title.unwrap_or(doc.title);
    let excerpt = edit.excerpt.unwrap_or(doc.excerpt);
    let body = edit.body.unwrap_or(doc.body);
    if !kb.update_content(id, &title, &excerpt, &body).await? {
        bail!("document {} not found", id);
    }
    tracing::info!(document_id = %id, published, "document edited");

    if !published {
        return Ok(None);
    }
    Ok(Some(queue.submit(IndexJob::Index(id.to_string())).await?))
}

/// Remove a document's index and then the document itself.
///
/// When the index cannot be removed the document is kept, so the removal
/// can be retried.
pub async fn remove_document(kb: &SqliteKnowledgeBase, queue: &IndexQueue, id: &str) -> Result<()> {
    if kb.fetch(id).await?.is_none() {
        bail!("document {} not found", id);
    }
    queue
        .submit(IndexJob::Delete(id.to_string()))
        .await?
        .wait()
        .await?;
    kb.delete(id).await?;
    tracing::info!(document_id = %id, "document removed");
    Ok(())
}
