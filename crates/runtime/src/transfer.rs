//! Import/export of a session's message history. Export never embeds card
//! or lorebook content, only the ids needed to rehydrate a session.

use chrono::Utc;
use domain::{ChatMessage, MessageRole, Result};
use uuid::Uuid;

use crate::history::ChatHistoryStore;
use crate::types::{ExportedMessage, TransferBundle};

const TRANSFER_VERSION: u32 = 1;

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

pub async fn export_session(
    history: &ChatHistoryStore,
    session_id: &str,
    character_id: &str,
    lorebook_id: Option<String>,
) -> Result<TransferBundle> {
    let messages = history.recent_non_archived(session_id, i64::MAX).await?;
    Ok(TransferBundle {
        version: TRANSFER_VERSION,
        character_id: character_id.to_string(),
        lorebook_id,
        messages: messages
            .into_iter()
            .map(|m| ExportedMessage {
                role: role_str(m.role).to_string(),
                content: m.content,
            })
            .collect(),
        metadata: Default::default(),
    })
}

/// Additive import: appends every message in `bundle` to `session_id`,
/// stamped with the current time in arrival order so relative ordering is
/// preserved.
pub async fn import_session(
    history: &ChatHistoryStore,
    session_id: &str,
    bundle: &TransferBundle,
) -> Result<usize> {
    let base = Utc::now();
    let mut imported = 0;
    for (i, exported) in bundle.messages.iter().enumerate() {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            role: role_from_str(&exported.role),
            content: exported.content.clone(),
            created_at: base + chrono::Duration::microseconds(i as i64),
            is_archived: false,
        };
        history.append(&message).await?;
        imported += 1;
    }
    Ok(imported)
}
