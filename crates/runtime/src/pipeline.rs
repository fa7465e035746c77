//! The per-turn context-assembly pipeline: resolves a session, retrieves
//! memories and lore, assembles a bounded prompt, dispatches to the
//! upstream LLM, persists both turns, and schedules background work.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use domain::{ChatMessage, DomainError, MessageRole, Result, session_id};
use llm::{ChatMessage as LlmMessage, GenerationParams, normalize_usage};
use prompt::{PromptInputs, assemble};
use uuid::Uuid;

use crate::jobs::PostTurnJob;
use crate::state::AppState;
use crate::types::{ChatRequest, ChatResponse, LoreBlocksOut, TokenStatsOut, UsageOut};

const DEFAULT_HISTORY_WINDOW: i64 = 500;
const LORE_VECTOR_K: usize = 10;

pub async fn handle_chat_turn(state: &Arc<AppState>, request: ChatRequest) -> Result<ChatResponse> {
    let user_id = request.user_id.trim().to_string();
    let message = request.message.trim().to_string();
    if user_id.is_empty() {
        return Err(DomainError::InvalidInput("user_id is required".into()));
    }
    if message.is_empty() {
        return Err(DomainError::InvalidInput("message must be non-empty".into()));
    }

    let card = request.card.unwrap_or_default();
    let card_id = card.id.to_string();
    let sid = session_id(&user_id, &card_id);

    let model = request
        .model
        .unwrap_or_else(|| state.config.llm.chat_model.clone());
    let limits = state.model_registry.lookup(&model);

    let raw_history = state
        .history
        .recent_non_archived(&sid, request.max_context_messages.unwrap_or(DEFAULT_HISTORY_WINDOW))
        .await?;
    let history_summary = raw_history
        .iter()
        .rev()
        .find(|m| m.is_summary())
        .map(|m| m.content.trim_start_matches(ChatMessage::SUMMARY_MARKER).to_string());
    let effective_history: Vec<ChatMessage> = raw_history.into_iter().filter(|m| !m.is_summary()).collect();

    let memories: Vec<String> = if request.memory_config.enabled {
        state
            .memory_store
            .search(&user_id, &message, request.memory_config.limit)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.content)
            .collect()
    } else {
        Vec::new()
    };

    let active_lorebook_ids: Vec<Uuid> = request
        .lore
        .iter()
        .map(|e| e.lorebook_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let forced_activation_ids: HashSet<Uuid> = state
        .vector_store
        .search_lore(&message, &active_lorebook_ids, LORE_VECTOR_K)
        .await
        .unwrap_or_default()
        .into_iter()
        .collect();

    let inputs = PromptInputs {
        card: &card,
        user_alias: card.user_alias.as_deref().unwrap_or("User"),
        lore_entries: &request.lore,
        history: &effective_history,
        user_message: &message,
        memories: &memories,
        history_summary: history_summary.as_deref(),
        instruction_modules: &request.instruction_modules,
        forced_activation_ids: &forced_activation_ids,
        refined_history: request.refined_history.as_deref(),
        requested_history_budget: request.max_context_tokens.unwrap_or(u32::MAX),
        model_limits: limits,
    };
    let assembled = assemble(&inputs);

    let mut llm_messages = vec![LlmMessage::system(assembled.system_prompt.clone())];
    llm_messages.extend(assembled.messages.iter().map(domain_to_llm_message));

    let params = GenerationParams::from(request.generation);
    let completion = state.chat_client.chat(&model, &llm_messages, &params).await?;

    let usage = normalize_usage(&model, completion.raw_usage.as_ref());

    let now = Utc::now();
    let user_message = ChatMessage {
        id: Uuid::new_v4(),
        session_id: sid.clone(),
        role: MessageRole::User,
        content: message.clone(),
        created_at: now,
        is_archived: false,
    };
    state.history.append(&user_message).await?;

    let assistant_message = ChatMessage {
        id: Uuid::new_v4(),
        session_id: sid.clone(),
        role: MessageRole::Assistant,
        content: completion.content.clone(),
        created_at: now + chrono::Duration::microseconds(1),
        is_archived: false,
    };
    state.history.append(&assistant_message).await?;

    state.jobs.submit(PostTurnJob {
        session_id: sid,
        user_id,
        context_window: limits.context_window,
        user_message: message,
        assistant_reply: completion.content.clone(),
    });

    Ok(ChatResponse {
        reply: completion.content,
        system_preview: assembled.system_prompt,
        used_lore: LoreBlocksOut {
            before_char: assembled.lore_blocks.before_char,
            after_char: assembled.lore_blocks.after_char,
            before_user: assembled.lore_blocks.before_user,
            after_user: assembled.lore_blocks.after_user,
        },
        triggered_entries: assembled.triggered_entry_ids,
        model,
        token_stats: TokenStatsOut {
            system_tokens: assembled.stats.system_tokens,
            user_tokens: assembled.stats.user_tokens,
            budget_history: assembled.stats.budget_history,
            history_tokens_used: assembled.stats.history_tokens_used,
            budget_left: assembled.stats.budget_left,
            low_budget_warning: assembled.stats.low_budget_warning,
        },
        usage: UsageOut {
            cache_hit: usage.cache_hit,
            cache_miss: usage.cache_miss,
            total: usage.total,
        },
    })
}

fn domain_to_llm_message(message: &ChatMessage) -> LlmMessage {
    match message.role {
        MessageRole::User => LlmMessage::user(message.content.clone()),
        MessageRole::Assistant => LlmMessage::assistant(message.content.clone()),
        MessageRole::System => LlmMessage::system(message.content.clone()),
    }
}

/// `scope=session` deletes exactly one session; `scope=card` deletes every
/// session belonging to the user plus all of their memories.
pub async fn delete_history(state: &Arc<AppState>, user_id: &str, character_id: &str, scope_is_card: bool) -> Result<()> {
    if scope_is_card {
        state.history.delete_all_sessions_for_user(user_id).await?;
        state.memory_store.delete_all(user_id).await?;
    } else {
        let sid = session_id(user_id, character_id);
        state.history.delete_session(&sid).await?;
    }
    Ok(())
}
