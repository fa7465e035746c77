//! Orchestration layer: wires C1-C9 together behind a process-wide
//! `AppState` and exposes the session-turn pipeline consumed by the HTTP
//! surface.

pub mod history;
pub mod jobs;
pub mod pipeline;
pub mod state;
pub mod transfer;
pub mod types;

pub use history::ChatHistoryStore;
pub use pipeline::{delete_history, handle_chat_turn};
pub use state::AppState;
