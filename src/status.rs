//! Knowledge-base and index health overview for `hdx status`.
//!
//! Reindex progress lives in the process running the reindex and is
//! reported by `hdx reindex` itself, so it is not part of this report.

use anyhow::Result;
use helpdesk_agent_core::index::CollectionInfo;

use crate::bootstrap::Services;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub db_path: String,
    pub db_size: u64,
    pub documents: i64,
    pub published: i64,
    pub chunks: i64,
    pub conversations: i64,
    pub last_document_update: Option<i64>,
    pub collection: String,
    /// `None` when the vector index could not be reached.
    pub index: Option<CollectionInfo>,
}

pub async fn collect(services: &Services) -> Result<StatusReport> {
    let (documents, published, chunks) = services.kb.counts().await?;
    let conversations = services.support.conversation_count().await?;
    let last_document_update: Option<i64> =
        sqlx::query_scalar("SELECT MAX(updated_at) FROM kb_documents")
            .fetch_one(&services.pool)
            .await?;

    let index = match services.index.collection_info().await {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "vector index unreachable");
            None
        }
    };

    let db_size = std::fs::metadata(&services.config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatusReport {
        db_path: services.config.db.path.display().to_string(),
        db_size,
        documents,
        published,
        chunks,
        conversations,
        last_document_update,
        collection: services.config.vector_index.collection.clone(),
        index,
    })
}

impl StatusReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Helpdesk Agent Status\n");
        out.push_str("=====================\n\n");
        out.push_str(&format!("  Database:       {}\n", self.db_path));
        out.push_str(&format!("  Size:           {}\n\n", format_bytes(self.db_size)));
        out.push_str(&format!(
            "  Documents:      {} ({} published)\n",
            self.documents, self.published
        ));
        out.push_str(&format!("  Chunks:         {}\n", self.chunks));
        out.push_str(&format!("  Conversations:  {}\n", self.conversations));
        out.push_str(&format!(
            "  Last edit:      {}\n\n",
            self.last_document_update
                .map(format_ts_relative)
                .unwrap_or_else(|| "never".to_string())
        ));

        let index_line = match &self.index {
            None => "unreachable".to_string(),
            Some(info) if !info.exists => "missing (run `hdx init`)".to_string(),
            Some(info) => {
                let mut line = format!("{} points", info.points_count);
                if info.points_count as i64 != self.chunks {
                    line.push_str(&format!(" (expected {}, run `hdx reindex`)", self.chunks));
                }
                line
            }
        };
        out.push_str(&format!("  Collection:     {}\n", self.collection));
        out.push_str(&format!("  Vectors:        {}\n", index_line));
        out
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Unix timestamp as "3 hours ago", or a date when older than a month.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min{} ago", delta / 60, plural(delta / 60))
    } else if delta < 86400 {
        format!("{} hour{} ago", delta / 3600, plural(delta / 3600))
    } else if delta < 86400 * 30 {
        format!("{} day{} ago", delta / 86400, plural(delta / 86400))
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(index: Option<CollectionInfo>) -> StatusReport {
        StatusReport {
            db_path: "data/hdx.sqlite".into(),
            db_size: 2048,
            documents: 3,
            published: 2,
            chunks: 7,
            conversations: 1,
            last_document_update: None,
            collection: "knowledge_base".into(),
            index,
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_relative_time() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }

    #[test]
    fn test_render_flags_point_drift() {
        let out = report(Some(CollectionInfo {
            exists: true,
            points_count: 5,
        }))
        .render();
        assert!(out.contains("3 (2 published)"));
        assert!(out.contains("5 points (expected 7, run `hdx reindex`)"));

        let out = report(None).render();
        assert!(out.contains("Vectors:        unreachable"));
        assert!(!out.contains(" documents"));
    }
}
