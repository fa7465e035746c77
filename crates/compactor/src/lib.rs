//! C7: History Compactor. Runs in the background after every assistant
//! turn, summarizing and archiving the oldest messages once token pressure
//! crosses a threshold.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use domain::{ChatMessage, Result};
use llm::{ChatMessage as LlmMessage, GenerationParams, LlmClient};
use tokio::sync::Mutex;
use uuid::Uuid;

pub const TOKEN_PRESSURE_THRESHOLD: f64 = 0.75;
pub const RESIDUAL_TARGET_RATIO: f64 = 0.50;

const SUMMARIZATION_SYSTEM_PROMPT: &str = "\
You are a narrative archivist. Summarize the following messages into a \
dense third-person synopsis that preserves names, decisions, and emotional \
beats. Do not invent details that are not present in the text.";

/// Persistence boundary the compactor operates through. The runtime crate
/// supplies a `sqlx`-backed implementation running in its own DB session,
/// per the "isolated DB session" requirement.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn total_tokens_non_archived_non_summary(&self, session_id: &str) -> Result<u32>;
    /// Oldest-first, excluding archived and summary messages.
    async fn oldest_non_archived_non_summary(&self, session_id: &str) -> Result<Vec<ChatMessage>>;
    async fn mark_archived(&self, ids: &[Uuid]) -> Result<()>;
    async fn insert_summary(&self, session_id: &str, content: &str, created_before: DateTime<Utc>) -> Result<()>;
}

/// Select the oldest-first prefix of `messages` whose accumulated token
/// cost covers `total_tokens - residual_target`. Returns `None` if no
/// compaction is needed (`total_tokens` below the pressure threshold).
pub fn plan_compaction(
    messages: &[ChatMessage],
    total_tokens: u32,
    context_window: u32,
) -> Option<Vec<ChatMessage>> {
    let threshold = (context_window as f64 * TOKEN_PRESSURE_THRESHOLD) as u32;
    if total_tokens <= threshold {
        return None;
    }

    let target = (context_window as f64 * RESIDUAL_TARGET_RATIO) as u32;
    let to_shed = total_tokens.saturating_sub(target);

    let mut selected = Vec::new();
    let mut accumulated = 0u32;
    for msg in messages {
        if accumulated >= to_shed {
            break;
        }
        accumulated += domain::estimate_tokens(&msg.content);
        selected.push(msg.clone());
    }
    Some(selected)
}

pub struct HistoryCompactor<S: HistorySource> {
    source: Arc<S>,
    utility_client: LlmClient,
    utility_model: String,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: HistorySource> HistoryCompactor<S> {
    pub fn new(source: Arc<S>, utility_client: LlmClient, utility_model: impl Into<String>) -> Self {
        Self {
            source,
            utility_client,
            utility_model: utility_model.into(),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Probe a session for token pressure and compact it if needed.
    /// Reentrant-safe: a concurrent call on the same session blocks on the
    /// per-session lock rather than racing; `try_lock` would be a no-op
    /// variant if fire-and-forget dedup is preferred.
    pub async fn probe(&self, session_id: &str, context_window: u32) -> Result<bool> {
        let lock = self.lock_for(session_id).await;
        let Ok(_guard) = lock.try_lock() else {
            // Another compaction is already running for this session.
            return Ok(false);
        };

        let total = self.source.total_tokens_non_archived_non_summary(session_id).await?;
        let oldest_first = self.source.oldest_non_archived_non_summary(session_id).await?;

        let Some(to_archive) = plan_compaction(&oldest_first, total, context_window) else {
            return Ok(false);
        };
        if to_archive.is_empty() {
            return Ok(false);
        }

        let llm_messages: Vec<LlmMessage> = to_archive
            .iter()
            .map(|m| match m.role {
                domain::MessageRole::User => LlmMessage::user(m.content.clone()),
                domain::MessageRole::Assistant => LlmMessage::assistant(m.content.clone()),
                domain::MessageRole::System => LlmMessage::system(m.content.clone()),
            })
            .collect();

        let mut request = vec![LlmMessage::system(SUMMARIZATION_SYSTEM_PROMPT)];
        request.extend(llm_messages);

        let completion = self
            .utility_client
            .chat(&self.utility_model, &request, &GenerationParams::default())
            .await;

        let summary = match completion {
            Ok(c) if !c.content.trim().is_empty() => c.content,
            Ok(_) => {
                tracing::warn!(session_id, "compaction aborted: empty summary response");
                return Ok(false);
            }
            Err(err) => {
                tracing::warn!(session_id, error = %err, "compaction aborted: summarization call failed");
                return Ok(false);
            }
        };

        let ids: Vec<Uuid> = to_archive.iter().map(|m| m.id).collect();
        self.source.mark_archived(&ids).await?;

        let earliest_retained_at = oldest_first
            .get(to_archive.len())
            .map(|m| m.created_at)
            .unwrap_or_else(Utc::now);
        let summary_timestamp = earliest_retained_at - Duration::microseconds(1);

        let content = format!("{}{}", ChatMessage::SUMMARY_MARKER, summary);
        self.source
            .insert_summary(session_id, &content, summary_timestamp)
            .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(content: &str, offset_secs: i64) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            session_id: "s".into(),
            role: domain::MessageRole::User,
            content: content.to_string(),
            created_at: Utc::now() + Duration::seconds(offset_secs),
            is_archived: false,
        }
    }

    #[test]
    fn no_compaction_below_threshold() {
        let messages = vec![msg("short", 0)];
        let plan = plan_compaction(&messages, 100, 1000);
        assert!(plan.is_none());
    }

    #[test]
    fn compaction_boundary_scenario() {
        // context 64_000 -> threshold 48_000, target 32_000.
        // total tokens = 48_100 (> threshold). Need to shed 16_100 tokens.
        let messages: Vec<ChatMessage> = (0..20)
            .map(|i| msg(&"测".repeat(400), i as i64)) // ~801 tokens each
            .collect();
        let plan = plan_compaction(&messages, 48_100, 64_000).unwrap();
        let shed: u32 = plan.iter().map(|m| domain::estimate_tokens(&m.content)).sum();
        assert!(shed >= 16_100);
        assert!(plan.len() < messages.len());
    }
}
