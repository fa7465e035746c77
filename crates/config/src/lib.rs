use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod models;
pub use models::ModelRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://roleplay.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub chat_model: String,
    pub chat_api_key: String,
    pub chat_api_url: String,
    pub utility_model: String,
    pub utility_api_key: String,
    pub utility_api_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            chat_model: "gpt-4o-mini".to_string(),
            chat_api_key: String::new(),
            chat_api_url: "https://api.openai.com/v1".to_string(),
            utility_model: "gpt-4o-mini".to_string(),
            utility_api_key: String::new(),
            utility_api_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub embedding_model: String,
    pub vector_db_path: String,
    pub api_key: String,
    pub api_url: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-small".to_string(),
            vector_db_path: "./data/vectors".to_string(),
            api_key: String::new(),
            api_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Token-pressure ratio (of context_window) that triggers summarization.
    /// The legacy count-based `SUMMARY_HISTORY_THRESHOLD` is still parsed
    /// for backward compatibility but is no longer load-bearing.
    pub token_pressure_threshold: f64,
    pub legacy_summary_history_threshold: Option<u32>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            token_pressure_threshold: 0.75,
            legacy_summary_history_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub log_level: String,
    pub max_model_context_length: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
            max_model_context_length: 16_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub rag: RagConfig,
    pub compaction: CompactionConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Recognized environment variables (§6 of the spec), overriding any
    /// value loaded from TOML.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("CHAT_MODEL") {
            self.llm.chat_model = v;
        }
        if let Ok(v) = env::var("CHAT_API_KEY").or_else(|_| env::var("GLOBAL_LLM_KEY")) {
            self.llm.chat_api_key = v;
        }
        if let Ok(v) = env::var("CHAT_API_URL").or_else(|_| env::var("GLOBAL_LLM_URL")) {
            self.llm.chat_api_url = v;
        }
        if let Ok(v) = env::var("UTILITY_MODEL") {
            self.llm.utility_model = v;
        }
        if let Ok(v) = env::var("UTILITY_API_KEY") {
            self.llm.utility_api_key = v;
        }
        if let Ok(v) = env::var("UTILITY_API_URL") {
            self.llm.utility_api_url = v;
        }
        if let Ok(v) = env::var("RAG_EMBEDDING_MODEL") {
            self.rag.embedding_model = v;
        }
        if let Ok(v) = env::var("RAG_VECTOR_DB_PATH") {
            self.rag.vector_db_path = v;
        }
        if let Ok(v) = env::var("RAG_API_KEY") {
            self.rag.api_key = v;
        }
        if let Ok(v) = env::var("RAG_API_URL") {
            self.rag.api_url = v;
        }
        if let Ok(v) = env::var("SUMMARY_HISTORY_THRESHOLD") {
            self.compaction.legacy_summary_history_threshold = v.parse().ok();
        }
        if let Ok(v) = env::var("MAX_MODEL_CONTEXT_LENGTH") {
            if let Ok(parsed) = v.parse() {
                self.server.max_model_context_length = parsed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = AppConfig::default();
        assert_eq!(config.compaction.token_pressure_threshold, 0.75);
        assert!(config.server.max_model_context_length > 0);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = AppConfig::default();
        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.llm.chat_model, config.llm.chat_model);
    }

    #[test]
    fn env_override_takes_precedence() {
        unsafe {
            env::set_var("CHAT_MODEL", "claude-3-opus");
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.llm.chat_model, "claude-3-opus");
        unsafe {
            env::remove_var("CHAT_MODEL");
        }
    }
}
