//! ChatMessage persistence. Backs both the assembler's history reads and
//! the compactor's `HistorySource` boundary, each against its own pool
//! connection (never the same in-flight transaction).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use compactor::HistorySource;
use domain::{ChatMessage, DomainError, MessageRole, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatHistoryStore {
    pool: SqlitePool,
}

impl ChatHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                is_archived INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn append(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, session_id, role, content, created_at, is_archived) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(&message.session_id)
        .bind(role_str(message.role))
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .bind(message.is_archived as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent non-archived messages, chronological order. Queried
    /// newest-first with a `LIMIT`, then reversed back to ascending order
    /// (avoids scanning the whole table to find a tail window).
    pub async fn recent_non_archived(&self, session_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at, is_archived FROM messages \
             WHERE session_id = ? AND is_archived = 0 ORDER BY created_at DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<ChatMessage> = rows.into_iter().map(row_to_message).collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn list_archived(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at, is_archived FROM messages \
             WHERE session_id = ? AND is_archived = 1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_message).collect()
    }

    pub async fn unarchive(&self, ids: &[Uuid]) -> Result<()> {
        for id in ids {
            sqlx::query("UPDATE messages SET is_archived = 0 WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Delete every message for exactly one session (`DELETE /chat/history?scope=session`).
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every session whose id is prefixed by `user_id::` (`scope=card`
    /// deletes all of a user's card sessions).
    pub async fn delete_all_sessions_for_user(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM messages WHERE session_id LIKE ?")
            .bind(format!("{user_id}::%"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

fn role_from_str(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        _ => MessageRole::User,
    }
}

fn row_to_message(row: sqlx::sqlite::SqliteRow) -> Result<ChatMessage> {
    let id: String = row.try_get("id")?;
    let created_at: String = row.try_get("created_at")?;
    Ok(ChatMessage {
        id: Uuid::parse_str(&id).map_err(|e| DomainError::Internal(e.to_string()))?,
        session_id: row.try_get("session_id")?,
        role: role_from_str(row.try_get::<String, _>("role")?.as_str()),
        content: row.try_get("content")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DomainError::Internal(e.to_string()))?,
        is_archived: row.try_get::<i64, _>("is_archived")? != 0,
    })
}

#[async_trait]
impl HistorySource for ChatHistoryStore {
    async fn total_tokens_non_archived_non_summary(&self, session_id: &str) -> Result<u32> {
        let rows = sqlx::query(
            "SELECT content FROM messages WHERE session_id = ? AND is_archived = 0",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut total = 0u32;
        for row in rows {
            let content: String = row.try_get("content")?;
            if content.contains("摘要") {
                continue;
            }
            total += domain::estimate_tokens(&content);
        }
        Ok(total)
    }

    async fn oldest_non_archived_non_summary(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, created_at, is_archived FROM messages \
             WHERE session_id = ? AND is_archived = 0 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        let messages: Vec<ChatMessage> = rows.into_iter().map(row_to_message).collect::<Result<_>>()?;
        Ok(messages.into_iter().filter(|m| !m.is_summary()).collect())
    }

    async fn mark_archived(&self, ids: &[Uuid]) -> Result<()> {
        for id in ids {
            sqlx::query("UPDATE messages SET is_archived = 1 WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn insert_summary(&self, session_id: &str, content: &str, created_before: DateTime<Utc>) -> Result<()> {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            role: MessageRole::System,
            content: content.to_string(),
            created_at: created_before,
            is_archived: false,
        };
        self.append(&message).await
    }
}
