//! Conversations, clients, messages and tags.
//!
//! [`SupportStore`] is the only way agent tools touch persistent support
//! records. [`SqliteSupportStore`] implements it on the `clients`,
//! `conversations`, `messages`, `tags` and `conversation_tags` tables.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str() == lowered)
            .with_context(|| format!("invalid priority '{}'", s))
    }
}

/// Who currently answers the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Assignee {
    Bot,
    Human,
}

impl Assignee {
    fn as_str(&self) -> &'static str {
        match self {
            Assignee::Bot => "bot",
            Assignee::Human => "human",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "human" => Assignee::Human,
            _ => Assignee::Bot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: String,
    pub client_id: String,
    pub channel_id: String,
    pub department_id: Option<String>,
    pub assignee: Assignee,
    pub priority: Option<Priority>,
    pub custom_fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// ISO 639-1 code, e.g. `"en"`.
    pub language: String,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Client,
    Bot,
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::Client => "client",
            Sender::Bot => "bot",
            Sender::System => "system",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "client" => Sender::Client,
            "bot" => Sender::Bot,
            _ => Sender::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender: Sender,
    pub sender_id: Option<String>,
    pub content: String,
    pub created_at: i64,
}

/// Persistent support records as seen by the agent.
#[async_trait]
pub trait SupportStore: Send + Sync {
    async fn conversation(&self, id: &str) -> Result<Option<Conversation>>;

    async fn client(&self, id: &str) -> Result<Option<Client>>;

    /// The last `limit` messages of a conversation, oldest first.
    async fn recent_messages(&self, conversation_id: &str, limit: usize)
        -> Result<Vec<StoredMessage>>;

    async fn post_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        sender_id: Option<&str>,
        content: &str,
    ) -> Result<StoredMessage>;

    async fn assign_to_human(&self, conversation_id: &str, department_id: Option<&str>)
        -> Result<()>;

    /// Shallow-merge `fields` into the client's data. `name`, `email` and
    /// `phone` string values also update the matching columns.
    async fn merge_client_data(&self, client_id: &str, fields: &Map<String, Value>) -> Result<()>;

    async fn merge_custom_fields(
        &self,
        conversation_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()>;

    /// Merge `fields` into the client's data and the conversation's custom
    /// fields in one transaction.
    async fn save_user_info(
        &self,
        client_id: &str,
        conversation_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()>;

    async fn set_priority(&self, conversation_id: &str, priority: Priority) -> Result<()>;

    /// Find or create the tag and link it. Returns `false` when the
    /// conversation already carried it.
    async fn tag_conversation(&self, conversation_id: &str, tag: &str) -> Result<bool>;
}

pub struct SqliteSupportStore {
    pool: SqlitePool,
}

impl SqliteSupportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_client(&self, name: &str, language: &str) -> Result<Client> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO clients (id, name, language, data_json, created_at, updated_at) VALUES (?, ?, ?, '{}', ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(language)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Client {
            id,
            name: name.to_string(),
            email: None,
            phone: None,
            language: language.to_string(),
            data: Map::new(),
        })
    }

    pub async fn create_conversation(
        &self,
        client_id: &str,
        channel_id: &str,
        department_id: Option<&str>,
    ) -> Result<Conversation> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO conversations (id, client_id, channel_id, department_id, assignee, custom_fields_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'bot', '{}', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(client_id)
        .bind(channel_id)
        .bind(department_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Conversation {
            id,
            client_id: client_id.to_string(),
            channel_id: channel_id.to_string(),
            department_id: department_id.map(str::to_string),
            assignee: Assignee::Bot,
            priority: None,
            custom_fields: Map::new(),
        })
    }

    /// Tag names linked to a conversation, alphabetical.
    pub async fn tags(&self, conversation_id: &str) -> Result<Vec<String>> {
        let names = sqlx::query_scalar(
            r#"
            SELECT t.name FROM tags t
            JOIN conversation_tags ct ON ct.tag_id = t.id
            WHERE ct.conversation_id = ?
            ORDER BY t.name
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    pub async fn conversation_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?)
    }
}

fn parse_object(json: &str, what: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(json).with_context(|| format!("corrupt {} JSON", what))? {
        Value::Object(map) => Ok(map),
        _ => bail!("{} JSON is not an object", what),
    }
}

#[async_trait]
impl SupportStore for SqliteSupportStore {
    async fn conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let assignee: String = row.get("assignee");
        let priority: Option<String> = row.get("priority");
        let custom: String = row.get("custom_fields_json");
        Ok(Some(Conversation {
            id: row.get("id"),
            client_id: row.get("client_id"),
            channel_id: row.get("channel_id"),
            department_id: row.get("department_id"),
            assignee: Assignee::parse(&assignee),
            priority: priority.and_then(|p| p.parse().ok()),
            custom_fields: parse_object(&custom, "custom fields")?,
        }))
    }

    async fn client(&self, id: &str) -> Result<Option<Client>> {
        let row = sqlx::query("SELECT * FROM clients WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let data: String = row.get("data_json");
        Ok(Some(Client {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            phone: row.get("phone"),
            language: row.get("language"),
            data: parse_object(&data, "client data")?,
        }))
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT * FROM messages WHERE conversation_id = ?
                ORDER BY seq DESC LIMIT ?
            ) ORDER BY seq ASC
            "#,
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let sender: String = row.get("sender");
                StoredMessage {
                    id: row.get("id"),
                    conversation_id: row.get("conversation_id"),
                    sender: Sender::parse(&sender),
                    sender_id: row.get("sender_id"),
                    content: row.get("content"),
                    created_at: row.get("created_at"),
                }
            })
            .collect())
    }

    async fn post_message(
        &self,
        conversation_id: &str,
        sender: Sender,
        sender_id: Option<&str>,
        content: &str,
    ) -> Result<StoredMessage> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender, sender_id, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(sender.as_str())
        .bind(sender_id)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(StoredMessage {
            id,
            conversation_id: conversation_id.to_string(),
            sender,
            sender_id: sender_id.map(str::to_string),
            content: content.to_string(),
            created_at: now,
        })
    }

    async fn assign_to_human(
        &self,
        conversation_id: &str,
        department_id: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET assignee = ?, department_id = COALESCE(?, department_id), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Assignee::Human.as_str())
        .bind(department_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("conversation {} not found", conversation_id);
        }
        Ok(())
    }

    async fn merge_client_data(&self, client_id: &str, fields: &Map<String, Value>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        merge_client_data_in(&mut tx, client_id, fields).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn merge_custom_fields(
        &self,
        conversation_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        merge_custom_fields_in(&mut tx, conversation_id, fields).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_user_info(
        &self,
        client_id: &str,
        conversation_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        merge_client_data_in(&mut tx, client_id, fields).await?;
        merge_custom_fields_in(&mut tx, conversation_id, fields).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_priority(&self, conversation_id: &str, priority: Priority) -> Result<()> {
        let result =
            sqlx::query("UPDATE conversations SET priority = ?, updated_at = ? WHERE id = ?")
                .bind(priority.as_str())
                .bind(chrono::Utc::now().timestamp())
                .bind(conversation_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            bail!("conversation {} not found", conversation_id);
        }
        Ok(())
    }

    async fn tag_conversation(&self, conversation_id: &str, tag: &str) -> Result<bool> {
        let name = tag.trim();
        if name.is_empty() {
            bail!("tag must not be empty");
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO tags (id, name) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let tag_id: String = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;

        let linked = sqlx::query(
            "INSERT INTO conversation_tags (conversation_id, tag_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
        )
        .bind(conversation_id)
        .bind(&tag_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(linked.rows_affected() > 0)
    }
}

async fn merge_client_data_in(
    conn: &mut SqliteConnection,
    client_id: &str,
    fields: &Map<String, Value>,
) -> Result<()> {
    let current: Option<String> = sqlx::query_scalar("SELECT data_json FROM clients WHERE id = ?")
        .bind(client_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(current) = current else {
        bail!("client {} not found", client_id);
    };
    let mut data = parse_object(&current, "client data")?;
    for (k, v) in fields {
        data.insert(k.clone(), v.clone());
    }

    let column = |key: &str| fields.get(key).and_then(Value::as_str).map(str::to_string);
    sqlx::query(
        r#"
        UPDATE clients SET
            data_json = ?,
            name = COALESCE(?, name),
            email = COALESCE(?, email),
            phone = COALESCE(?, phone),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(Value::Object(data).to_string())
    .bind(column("name"))
    .bind(column("email"))
    .bind(column("phone"))
    .bind(chrono::Utc::now().timestamp())
    .bind(client_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn merge_custom_fields_in(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    fields: &Map<String, Value>,
) -> Result<()> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT custom_fields_json FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&mut *conn)
            .await?;
    let Some(current) = current else {
        bail!("conversation {} not found", conversation_id);
    };
    let mut custom = parse_object(&current, "custom fields")?;
    for (k, v) in fields {
        custom.insert(k.clone(), v.clone());
    }

    sqlx::query("UPDATE conversations SET custom_fields_json = ?, updated_at = ? WHERE id = ?")
        .bind(Value::Object(custom).to_string())
        .bind(chrono::Utc::now().timestamp())
        .bind(conversation_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
