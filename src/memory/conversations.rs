//! Persistent chat threads: conversations, messages, and document
//! attachments.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("conversation store error: {0}")]
    #[diagnostic(code(findry::memory::store))]
    Store(#[from] sqlx::Error),

    #[error("conversation {0} not found")]
    #[diagnostic(code(findry::memory::not_found))]
    NotFound(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
    pub is_pinned: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "assistant" {
            MessageRole::Assistant
        } else {
            MessageRole::User
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// JSON-encoded search results attached to assistant messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    /// JSON-encoded step trace for the turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_steps: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                is_pinned INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                query TEXT,
                results TEXT,
                thinking_steps TEXT,
                timestamp TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversation_documents (
                conversation_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                attached_at TEXT NOT NULL,
                PRIMARY KEY (conversation_id, document_id)
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, timestamp)",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_user
             ON conversations(user_id, updated_at)",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn create(
        &self,
        user_id: &str,
        first_query: &str,
    ) -> Result<Conversation, StoreError> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: derive_title(first_query, 50),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            message_count: 0,
            is_pinned: false,
        };
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at, message_count, is_pinned)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0)",
        )
        .bind(&conversation.id)
        .bind(&conversation.user_id)
        .bind(&conversation.title)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(conversation)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_conversation).transpose()?)
    }

    /// Conversations for a user, pinned first, most recently updated next.
    pub async fn list(&self, user_id: &str, limit: i64) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE user_id = ?1
             ORDER BY is_pinned DESC, updated_at DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row_to_conversation(row).map_err(StoreError::from))
            .collect()
    }

    pub async fn rename(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(title)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn set_pinned(&self, id: &str, pinned: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE conversations SET is_pinned = ?1 WHERE id = ?2")
            .bind(pinned as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM conversation_documents WHERE conversation_id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        query: Option<&str>,
        results: Option<&Value>,
        thinking_steps: Option<&Value>,
    ) -> Result<Message, StoreError> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            query: query.map(str::to_string),
            results: results.cloned(),
            thinking_steps: thinking_steps.cloned(),
            timestamp: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, query, results, thinking_steps, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(role.as_str())
        .bind(&message.content)
        .bind(&message.query)
        .bind(message.results.as_ref().map(|v| v.to_string()))
        .bind(message.thinking_steps.as_ref().map(|v| v.to_string()))
        .bind(message.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE conversations SET message_count = message_count + 1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(message.timestamp.to_rfc3339())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    /// Messages in chronological order, newest `limit` when set.
    pub async fn messages(
        &self,
        conversation_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    "SELECT * FROM (
                        SELECT * FROM messages WHERE conversation_id = ?1
                        ORDER BY timestamp DESC LIMIT ?2
                     ) ORDER BY timestamp ASC",
                )
                .bind(conversation_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC",
                )
                .bind(conversation_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter()
            .map(|row| row_to_message(row).map_err(StoreError::from))
            .collect()
    }

    pub async fn attach_documents(
        &self,
        conversation_id: &str,
        document_ids: &[String],
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        for document_id in document_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO conversation_documents (conversation_id, document_id, attached_at)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(conversation_id)
            .bind(document_id)
            .bind(&now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn attached_documents(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT document_id FROM conversation_documents
             WHERE conversation_id = ?1 ORDER BY attached_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("document_id").map_err(StoreError::from))
            .collect()
    }

    pub async fn detach_document(
        &self,
        conversation_id: &str,
        document_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "DELETE FROM conversation_documents WHERE conversation_id = ?1 AND document_id = ?2",
        )
        .bind(conversation_id)
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_conversation(row: sqlx::sqlite::SqliteRow) -> Result<Conversation, sqlx::Error> {
    Ok(Conversation {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        created_at: parse_ts(&row.try_get::<String, _>("created_at")?),
        updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?),
        message_count: row.try_get("message_count")?,
        is_pinned: row.try_get::<i64, _>("is_pinned")? != 0,
    })
}

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> Result<Message, sqlx::Error> {
    let parse_json = |field: Option<String>| field.and_then(|s| serde_json::from_str(&s).ok());
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: MessageRole::parse(&row.try_get::<String, _>("role")?),
        content: row.try_get("content")?,
        query: row.try_get("query")?,
        results: parse_json(row.try_get("results")?),
        thinking_steps: parse_json(row.try_get("thinking_steps")?),
        timestamp: parse_ts(&row.try_get::<String, _>("timestamp")?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Title from the first query, cut on a word boundary.
pub fn derive_title(query: &str, max_length: usize) -> String {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return "New conversation".to_string();
    }
    if trimmed.len() <= max_length {
        return trimmed.to_string();
    }
    let mut title = String::new();
    for word in trimmed.split_whitespace() {
        if title.len() + word.len() + 1 > max_length.saturating_sub(3) {
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(word);
    }
    if title.is_empty() {
        let mut cut = max_length.saturating_sub(3).min(trimmed.len());
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        title = trimmed[..cut].to_string();
    }
    title.push_str("...");
    title
}

/// Recency bucket used by the listing UI.
pub fn recency_bucket(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> &'static str {
    let age = now - updated_at;
    if age < ChronoDuration::days(1) {
        "Today"
    } else if age < ChronoDuration::days(2) {
        "Yesterday"
    } else if age < ChronoDuration::days(7) {
        "This Week"
    } else {
        "Older"
    }
}
