//! C3: Memory Store. Durable facts keyed by user, with hybrid retrieval and
//! an atomic dual-write contract against the vector store gateway.

use std::sync::Arc;

use chrono::Utc;
use domain::{DomainError, Memory, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::retrieval::{fuse_results, keyword_candidates};
use crate::vectorstore::VectorStoreGateway;
use tracing::debug;

#[derive(Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
    vector_store: Arc<VectorStoreGateway>,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool, vector_store: Arc<VectorStoreGateway>) -> Self {
        Self { pool, vector_store }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                content TEXT NOT NULL,
                importance INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert the SQL row, then the vector record. If the vector write
    /// fails, the SQL row is rolled back and the error propagated — the
    /// atomicity contract in §3/§4.3.
    pub async fn create(&self, user_id: &str, content: &str, importance: u8) -> Result<Memory> {
        if content.trim().is_empty() {
            return Err(DomainError::InvalidInput("memory content is empty".into()));
        }

        let memory = Memory {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            importance: Memory::clamp_importance(importance),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO memories (id, user_id, content, importance, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(memory.id.to_string())
        .bind(&memory.user_id)
        .bind(&memory.content)
        .bind(memory.importance as i64)
        .bind(memory.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if let Err(err) = self
            .vector_store
            .upsert_memory(memory.id, &memory.content, &memory.user_id)
            .await
        {
            sqlx::query("DELETE FROM memories WHERE id = ?")
                .bind(memory.id.to_string())
                .execute(&self.pool)
                .await?;
            return Err(err);
        }

        Ok(memory)
    }

    pub async fn exists_similar(&self, text: &str, user_id: &str, threshold: f32) -> Result<bool> {
        self.vector_store.exists_similar(text, user_id, threshold).await
    }

    /// Vector hits first (ranked), then unique keyword hits, truncated to k.
    pub async fn search(&self, user_id: &str, query: &str, k: usize) -> Result<Vec<Memory>> {
        let vector_ids = self
            .vector_store
            .search_memory(query, user_id, k)
            .await
            .unwrap_or_default();

        let candidates = keyword_candidates(query);
        let keyword_rows = if candidates.is_empty() {
            Vec::new()
        } else {
            self.keyword_search(user_id, &candidates, k).await?
        };
        let keyword_ids: Vec<Uuid> = keyword_rows.iter().map(|m| m.id).collect();

        let fused_ids = fuse_results(vector_ids, keyword_ids, k);
        debug!(%user_id, fused = fused_ids.len(), "memory retrieval fused vector + keyword hits");
        let all_rows = self.load_rows(user_id).await?;
        let by_id: std::collections::HashMap<Uuid, Memory> =
            all_rows.into_iter().map(|m| (m.id, m)).collect();

        Ok(fused_ids.into_iter().filter_map(|id| by_id.get(&id).cloned()).collect())
    }

    async fn keyword_search(&self, user_id: &str, candidates: &[String], k: usize) -> Result<Vec<Memory>> {
        let mut query = String::from(
            "SELECT id, user_id, content, importance, created_at FROM memories WHERE user_id = ? AND (",
        );
        query.push_str(&vec!["content LIKE ?"; candidates.len()].join(" OR "));
        query.push_str(") ORDER BY importance DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, MemoryRow>(&query).bind(user_id);
        for candidate in candidates {
            q = q.bind(format!("%{candidate}%"));
        }
        q = q.bind(k as i64);

        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
    }

    async fn load_rows(&self, user_id: &str) -> Result<Vec<Memory>> {
        let rows: Vec<MemoryRow> =
            sqlx::query_as("SELECT id, user_id, content, importance, created_at FROM memories WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(MemoryRow::into_memory).collect())
    }

    pub async fn delete_all(&self, user_id: &str) -> Result<()> {
        let rows = self.load_rows(user_id).await?;
        let ids: Vec<Uuid> = rows.iter().map(|m| m.id).collect();
        self.vector_store.delete_many(&ids).await?;
        sqlx::query("DELETE FROM memories WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct MemoryRow {
    id: String,
    user_id: String,
    content: String,
    importance: i64,
    created_at: String,
}

impl MemoryRow {
    fn into_memory(self) -> Memory {
        Memory {
            id: Uuid::parse_str(&self.id).unwrap_or_else(|_| Uuid::nil()),
            user_id: self.user_id,
            content: self.content,
            importance: self.importance as u8,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> MemoryStore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let vector_store = Arc::new(VectorStoreGateway::new(
            std::env::temp_dir().join(format!("vec-test-{}.jsonl", Uuid::new_v4())),
            None,
        ));
        let store = MemoryStore::new(pool, vector_store);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_and_search_round_trip() {
        let store = setup().await;
        store.create("u1", "likes spicy food", 3).await.unwrap();
        store.create("u1", "dislikes cold weather", 2).await.unwrap();

        let results = store.search("u1", "spicy", 5).await.unwrap();
        assert!(results.iter().any(|m| m.content.contains("spicy")));
    }

    #[tokio::test]
    async fn rejects_empty_content() {
        let store = setup().await;
        let err = store.create("u1", "   ", 3).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn delete_all_clears_user_memories() {
        let store = setup().await;
        store.create("u1", "fact one", 3).await.unwrap();
        store.create("u1", "fact two", 3).await.unwrap();
        store.delete_all("u1").await.unwrap();
        let results = store.search("u1", "fact", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn importance_is_clamped() {
        let store = setup().await;
        let memory = store.create("u1", "edge case", 9).await.unwrap();
        assert_eq!(memory.importance, 5);
    }
}
