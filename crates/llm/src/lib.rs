//! OpenAI-compatible chat-completion and embedding clients for the
//! upstream LLM and the embedding backend, plus response parsing helpers
//! shared by the history compactor and fact extractor.

mod client;
mod extract;
mod usage;

pub use client::{ChatMessage, ChatRole, EmbeddingClient, LlmClient};
pub use extract::extract_json_output;
pub use usage::{Usage, normalize_usage};
