use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single turn in a session's history. `is_archived` messages remain
/// retrievable (export, audit) but are excluded from assembly-time reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_archived: bool,
}

impl ChatMessage {
    /// Marker prepended to summary message content so it can be
    /// distinguished from ordinary system messages (migration fidelity).
    pub const SUMMARY_MARKER: &'static str = "【历史摘要】";

    pub fn is_summary(&self) -> bool {
        self.role == MessageRole::System && self.content.contains("摘要")
    }
}

/// A durable long-term fact about a user. Every persisted Memory has a
/// corresponding vector record keyed by the same id (atomic dual-write).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub user_id: String,
    pub content: String,
    pub importance: u8,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    pub fn clamp_importance(importance: u8) -> u8 {
        importance.clamp(1, 5)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lorebook {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LorePosition {
    BeforeChar,
    AfterChar,
    BeforeUser,
    AfterUser,
}

impl Default for LorePosition {
    fn default() -> Self {
        LorePosition::BeforeChar
    }
}

/// Deserialize a lore position, defaulting unknown/absent values to
/// `beforeChar` rather than erroring — the activator must accept entries
/// authored before this field existed.
pub fn lore_position_or_default(raw: Option<&str>) -> LorePosition {
    match raw {
        Some("afterChar") => LorePosition::AfterChar,
        Some("beforeUser") => LorePosition::BeforeUser,
        Some("afterUser") => LorePosition::AfterUser,
        _ => LorePosition::BeforeChar,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LorebookEntry {
    pub id: Uuid,
    pub lorebook_id: Uuid,
    pub keywords: Vec<String>,
    pub content: String,
    pub enabled: bool,
    pub priority: f64,
    pub order: f64,
    pub probability: f64,
    pub use_regex: bool,
    pub case_sensitive: bool,
    pub match_whole_word: bool,
    pub exclude: bool,
    pub constant: bool,
    pub contextual: bool,
    pub authors_note: Option<String>,
    pub position: LorePosition,
}

impl LorebookEntry {
    /// All match keywords, deduplicated, empty strings dropped.
    pub fn unique_keywords(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CharacterCard {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub persona: String,
    pub scenario: String,
    pub first_mes: String,
    pub system_prompt: String,
    pub creator_notes: String,
    pub tags: Vec<String>,
    pub alternate_greetings: Vec<String>,
    pub user_alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPromptModule {
    pub id: Uuid,
    pub name: String,
    pub content: String,
    pub position: i32,
    pub is_enabled: bool,
}

/// Per-model token accounting limits, loaded from a JSON manifest (C9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelLimits {
    pub context_window: u32,
    pub max_output: u32,
    pub safety_buffer: u32,
}

/// `"{user_id}::card::{card_id}"` — the canonical session identifier.
pub fn session_id(user_id: &str, card_id: &str) -> String {
    format!("{user_id}::card::{card_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_format() {
        assert_eq!(session_id("u1", "c1"), "u1::card::c1");
    }

    #[test]
    fn summary_marker_detection() {
        let msg = ChatMessage {
            id: Uuid::nil(),
            session_id: "s".into(),
            role: MessageRole::System,
            content: "【历史摘要】previously...".into(),
            created_at: Utc::now(),
            is_archived: false,
        };
        assert!(msg.is_summary());
    }

    #[test]
    fn unique_keywords_dedups_and_trims() {
        let entry = LorebookEntry {
            id: Uuid::nil(),
            lorebook_id: Uuid::nil(),
            keywords: vec!["dragon".into(), " dragon ".into(), "".into(), "fire".into()],
            content: String::new(),
            enabled: true,
            priority: 0.0,
            order: 0.0,
            probability: 1.0,
            use_regex: false,
            case_sensitive: false,
            match_whole_word: false,
            exclude: false,
            constant: false,
            contextual: false,
            authors_note: None,
            position: LorePosition::BeforeChar,
        };
        assert_eq!(entry.unique_keywords(), vec!["dragon", "fire"]);
    }
}
