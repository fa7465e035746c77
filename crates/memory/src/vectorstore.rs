//! C2: Vector Store Gateway. Owns the ANN collection exclusively; all other
//! components reach it only through this module's operations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use domain::{DomainError, Result};
use llm::EmbeddingClient;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Memory,
    Lore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: Uuid,
    pub kind: RecordKind,
    pub text: String,
    pub embedding: Vec<f32>,
    pub user_id: Option<String>,
    pub lorebook_id: Option<Uuid>,
    pub tags: Vec<String>,
}

/// Idempotent write/delete ops queued under a lock until the next flush.
#[derive(Debug, Clone)]
enum PendingOp {
    Upsert(VectorRecord),
    Delete(Uuid),
}

/// Brute-force cosine-similarity ANN collection, persisted to a JSONL
/// snapshot file. Writes are queued and flushed by a background ticker
/// every 30s, or synchronously on `shutdown()`.
pub struct VectorStoreGateway {
    embedding_client: Option<EmbeddingClient>,
    records: RwLock<HashMap<Uuid, VectorRecord>>,
    pending: Mutex<Vec<PendingOp>>,
    snapshot_path: PathBuf,
}

impl VectorStoreGateway {
    /// `embedding_client = None` degrades gracefully: embed/search calls
    /// return `VectorStoreUnavailable`/empty results rather than panicking,
    /// matching the "no API key at init" error policy.
    pub fn new(snapshot_path: impl Into<PathBuf>, embedding_client: Option<EmbeddingClient>) -> Self {
        Self {
            embedding_client,
            records: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            snapshot_path: snapshot_path.into(),
        }
    }

    pub async fn load(&self) -> Result<()> {
        if !self.snapshot_path.exists() {
            return Ok(());
        }
        let raw = tokio::fs::read_to_string(&self.snapshot_path)
            .await
            .map_err(|e| DomainError::StorageUnavailable(e.to_string()))?;
        let mut records = self.records.write().await;
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<VectorRecord>(line) {
                Ok(rec) => {
                    records.insert(rec.id, rec);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping corrupt vector snapshot line");
                }
            }
        }
        Ok(())
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let Some(client) = &self.embedding_client else {
            return Err(DomainError::StorageUnavailable(
                "embedding backend not configured".into(),
            ));
        };
        client.embed(texts).await
    }

    pub async fn upsert_memory(&self, id: Uuid, text: &str, user_id: &str) -> Result<()> {
        let embedding = self.embed_or_empty(text).await;
        self.queue(PendingOp::Upsert(VectorRecord {
            id,
            kind: RecordKind::Memory,
            text: text.to_string(),
            embedding,
            user_id: Some(user_id.to_string()),
            lorebook_id: None,
            tags: Vec::new(),
        }))
        .await;
        Ok(())
    }

    pub async fn upsert_lore(
        &self,
        entry_id: Uuid,
        text: &str,
        lorebook_id: Uuid,
        tags: Vec<String>,
    ) -> Result<()> {
        let embedding = self.embed_or_empty(text).await;
        self.queue(PendingOp::Upsert(VectorRecord {
            id: entry_id,
            kind: RecordKind::Lore,
            text: text.to_string(),
            embedding,
            user_id: None,
            lorebook_id: Some(lorebook_id),
            tags,
        }))
        .await;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.queue(PendingOp::Delete(id)).await;
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[Uuid]) -> Result<()> {
        for id in ids {
            self.queue(PendingOp::Delete(*id)).await;
        }
        Ok(())
    }

    pub async fn search_memory(&self, query: &str, user_id: &str, k: usize) -> Result<Vec<Uuid>> {
        let query_embedding = match self.embed_or_none(query).await {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        let records = self.records.read().await;
        let mut scored: Vec<(Uuid, f32)> = records
            .values()
            .filter(|r| r.kind == RecordKind::Memory && r.user_id.as_deref() == Some(user_id))
            .map(|r| (r.id, cosine_similarity(&query_embedding, &r.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored.into_iter().take(k).map(|(id, _)| id).collect())
    }

    /// Restricted to `type=lore` records whose `lorebook_id` is in
    /// `active_lorebook_ids`. Returns ranked ids; the caller resolves full
    /// entries.
    pub async fn search_lore(
        &self,
        query: &str,
        active_lorebook_ids: &[Uuid],
        k: usize,
    ) -> Result<Vec<Uuid>> {
        let query_embedding = match self.embed_or_none(query).await {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        let records = self.records.read().await;
        let mut scored: Vec<(Uuid, f32)> = records
            .values()
            .filter(|r| {
                r.kind == RecordKind::Lore
                    && r.lorebook_id
                        .is_some_and(|lb| active_lorebook_ids.contains(&lb))
            })
            .map(|r| (r.id, cosine_similarity(&query_embedding, &r.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored.into_iter().take(k).map(|(id, _)| id).collect())
    }

    /// Top-1 cosine distance check. `distance < threshold` counts as a
    /// duplicate. Distance here is `1.0 - cosine_similarity`.
    pub async fn exists_similar(&self, text: &str, user_id: &str, threshold: f32) -> Result<bool> {
        let Some(query_embedding) = self.embed_or_none(text).await else {
            return Ok(false);
        };
        let records = self.records.read().await;
        let best = records
            .values()
            .filter(|r| r.kind == RecordKind::Memory && r.user_id.as_deref() == Some(user_id))
            .map(|r| 1.0 - cosine_similarity(&query_embedding, &r.embedding))
            .fold(f32::MAX, f32::min);
        Ok(best < threshold)
    }

    pub async fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut *pending);
        drop(pending);

        {
            let mut records = self.records.write().await;
            for op in ops {
                match op {
                    PendingOp::Upsert(rec) => {
                        records.insert(rec.id, rec);
                    }
                    PendingOp::Delete(id) => {
                        records.remove(&id);
                    }
                }
            }
        }

        self.persist().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.flush().await
    }

    /// Spawn the 30s background flush ticker. Returns the task handle so
    /// the caller can abort it on shutdown.
    pub fn spawn_flush_ticker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                if let Err(err) = self.flush().await {
                    tracing::warn!(error = %err, "vector store background flush failed");
                }
            }
        })
    }

    async fn queue(&self, op: PendingOp) {
        self.pending.lock().await.push(op);
    }

    async fn embed_or_empty(&self, text: &str) -> Vec<f32> {
        self.embed_or_none(text).await.unwrap_or_default()
    }

    async fn embed_or_none(&self, text: &str) -> Option<Vec<f32>> {
        let client = self.embedding_client.as_ref()?;
        match client.embed(&[text.to_string()]).await {
            Ok(mut vectors) => vectors.pop(),
            Err(err) => {
                tracing::warn!(error = %err, "embedding call failed, degrading to keyword-only");
                None
            }
        }
    }

    async fn persist(&self) -> Result<()> {
        let records = self.records.read().await;
        let mut buf = String::new();
        for rec in records.values() {
            buf.push_str(&serde_json::to_string(rec).map_err(|e| DomainError::Internal(e.to_string()))?);
            buf.push('\n');
        }
        drop(records);
        atomic_write(&self.snapshot_path, &buf).await
    }
}

async fn atomic_write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DomainError::StorageUnavailable(e.to_string()))?;
    }
    let tmp_path = path.with_extension("jsonl.tmp");
    tokio::fs::write(&tmp_path, content)
        .await
        .map_err(|e| DomainError::StorageUnavailable(e.to_string()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| DomainError::StorageUnavailable(e.to_string()))?;
    Ok(())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_embedding_backend_degrades_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = VectorStoreGateway::new(dir.path().join("vectors.jsonl"), None);
        let hits = gateway.search_memory("hello", "u1", 5).await.unwrap();
        assert!(hits.is_empty());
        assert!(!gateway.exists_similar("hello", "u1", 0.25).await.unwrap());
    }

    #[test]
    fn cosine_similarity_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }
}
