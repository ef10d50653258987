//! Knowledge-base documents and their durable chunk rows.
//!
//! The [`DocumentSource`] trait is everything the indexer needs from the
//! knowledge base. [`SqliteKnowledgeBase`] implements it on top of the
//! `kb_documents` and `kb_chunks` tables and adds the authoring operations
//! used by the CLI.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use helpdesk_agent_core::models::{point_id, Chunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Published,
    Archived,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "published" => Ok(DocumentStatus::Published),
            "archived" => Ok(DocumentStatus::Archived),
            other => bail!(
                "Unknown document status: '{}'. Must be draft, published, or archived.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KbDocument {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub body: String,
    pub status: DocumentStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl KbDocument {
    pub fn is_published(&self) -> bool {
        self.status == DocumentStatus::Published
    }

    /// Title, excerpt and body as one text, blank-line separated.
    pub fn index_text(&self) -> String {
        [&self.title, &self.excerpt, &self.body]
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A persisted chunk row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub token_count: i64,
    pub content_hash: String,
    pub generation: String,
}

/// Knowledge-base access needed by the indexer.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<KbDocument>>;

    /// Ids of every published document, oldest first.
    async fn published_ids(&self) -> Result<Vec<String>>;

    /// Atomically replace the chunk rows of one document.
    async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk], generation: &str)
        -> Result<()>;

    async fn delete_chunks(&self, document_id: &str) -> Result<()>;
}

/// Fields of a document being created.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub excerpt: String,
    pub body: String,
    pub status: DocumentStatus,
}

pub struct SqliteKnowledgeBase {
    pool: SqlitePool,
}

impl SqliteKnowledgeBase {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, doc: NewDocument) -> Result<KbDocument> {
        if doc.title.trim().is_empty() {
            bail!("Document title must not be empty");
        }
        let now = chrono::Utc::now().timestamp();
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO kb_documents (id, title, excerpt, body, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&doc.title)
        .bind(&doc.excerpt)
        .bind(&doc.body)
        .bind(doc.status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(KbDocument {
            id,
            title: doc.title,
            excerpt: doc.excerpt,
            body: doc.body,
            status: doc.status,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace a document's text. Returns `false` when the id is unknown.
    pub async fn update_content(
        &self,
        id: &str,
        title: &str,
        excerpt: &str,
        body: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE kb_documents SET title = ?, excerpt = ?, body = ?, updated_at = ? WHERE id = ?",
        )
        .bind(title)
        .bind(excerpt)
        .bind(body)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a document with its chunk rows. Returns `false` when the id is
    /// unknown. Vectors are not touched; remove the index first.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM kb_chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM kb_documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `false` when the id is unknown.
    pub async fn set_status(&self, id: &str, status: DocumentStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE kb_documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self, status: Option<DocumentStatus>) -> Result<Vec<KbDocument>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM kb_documents WHERE status = ? ORDER BY created_at, id")
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM kb_documents ORDER BY created_at, id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(document_from_row).collect()
    }

    /// Chunk rows of one document, by index.
    pub async fn chunks(&self, document_id: &str) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, content, token_count, content_hash, generation
            FROM kb_chunks WHERE document_id = ? ORDER BY chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StoredChunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                content: row.get("content"),
                token_count: row.get("token_count"),
                content_hash: row.get("content_hash"),
                generation: row.get("generation"),
            })
            .collect())
    }

    /// `(documents, published, chunks)` totals.
    pub async fn counts(&self) -> Result<(i64, i64, i64)> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kb_documents")
            .fetch_one(&self.pool)
            .await?;
        let published: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM kb_documents WHERE status = 'published'")
                .fetch_one(&self.pool)
                .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kb_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok((documents, published, chunks))
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<KbDocument> {
    let status: String = row.get("status");
    Ok(KbDocument {
        id: row.get("id"),
        title: row.get("title"),
        excerpt: row.get("excerpt"),
        body: row.get("body"),
        status: status.parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl DocumentSource for SqliteKnowledgeBase {
    async fn fetch(&self, id: &str) -> Result<Option<KbDocument>> {
        let row = sqlx::query("SELECT * FROM kb_documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn published_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM kb_documents WHERE status = 'published' ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn replace_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        generation: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM kb_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO kb_chunks
                    (id, document_id, chunk_index, content, token_count, content_hash, generation)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(point_id(document_id, chunk.index))
            .bind(document_id)
            .bind(chunk.index as i64)
            .bind(&chunk.content)
            .bind(chunk.token_count as i64)
            .bind(&chunk.content_hash)
            .bind(generation)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_chunks(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM kb_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
