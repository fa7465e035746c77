//! Wire types for the `/chat` surface. These are intentionally independent
//! of the library crates' domain types so the HTTP contract can evolve
//! without touching the assembly pipeline.

use std::collections::HashMap;

use domain::{CharacterCard, LorebookEntry};
use llm::GenerationParams;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfigInput {
    #[serde(default = "default_memory_enabled")]
    pub enabled: bool,
    #[serde(default = "default_memory_limit")]
    pub limit: usize,
}

fn default_memory_enabled() -> bool {
    true
}
fn default_memory_limit() -> usize {
    5
}

impl Default for MemoryConfigInput {
    fn default() -> Self {
        Self {
            enabled: default_memory_enabled(),
            limit: default_memory_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationParamsInput {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl From<GenerationParamsInput> for GenerationParams {
    fn from(p: GenerationParamsInput) -> Self {
        GenerationParams {
            temperature: p.temperature,
            top_p: p.top_p,
            max_tokens: p.max_tokens,
            frequency_penalty: p.frequency_penalty,
            presence_penalty: p.presence_penalty,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    pub card: Option<CharacterCard>,
    #[serde(default)]
    pub lore: Vec<LorebookEntry>,
    /// Pre-formatted instruction-module strings, already ordered by the
    /// caller (module CRUD and ordering are out of scope here).
    #[serde(default)]
    pub instruction_modules: Vec<String>,
    pub max_context_messages: Option<i64>,
    pub max_context_tokens: Option<u32>,
    pub model: Option<String>,
    #[serde(default)]
    pub memory_config: MemoryConfigInput,
    #[serde(default)]
    pub generation: GenerationParamsInput,
    pub refined_history: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenStatsOut {
    pub system_tokens: u32,
    pub user_tokens: u32,
    pub budget_history: u32,
    pub history_tokens_used: u32,
    pub budget_left: u32,
    pub low_budget_warning: bool,
}

#[derive(Debug, Serialize)]
pub struct UsageOut {
    pub cache_hit: u64,
    pub cache_miss: u64,
    pub total: u64,
}

#[derive(Debug, Serialize, Default)]
pub struct LoreBlocksOut {
    pub before_char: String,
    pub after_char: String,
    pub before_user: String,
    pub after_user: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub system_preview: String,
    pub used_lore: LoreBlocksOut,
    pub triggered_entries: Vec<Uuid>,
    pub model: String,
    pub token_stats: TokenStatsOut,
    pub usage: UsageOut,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryDeleteScope {
    Session,
    Card,
}

#[derive(Debug, Deserialize)]
pub struct HistoryDeleteQuery {
    pub user_id: String,
    pub character_id: String,
    pub scope: HistoryDeleteScope,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferBundle {
    pub version: u32,
    pub character_id: String,
    pub lorebook_id: Option<String>,
    pub messages: Vec<ExportedMessage>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}
