//! C6: Prompt Assembler. Composes the final (system, messages[]) payload
//! within a token budget derived from model limits.

use std::collections::HashSet;

use domain::{ChatMessage, LorebookEntry, MessageRole, ModelLimits, estimate_tokens};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::lorebook::{self, LoreBlocks};
use crate::role::render_role;
use domain::CharacterCard;

const MAX_SINGLE_MSG_CHARS: usize = 10_000;
const PER_MESSAGE_FRAMING_OVERHEAD: u32 = 4;
const MIN_REMAINING_WARNING_THRESHOLD: u32 = 500;

pub struct TokenStats {
    pub system_tokens: u32,
    pub user_tokens: u32,
    pub budget_history: u32,
    pub history_tokens_used: u32,
    pub budget_left: u32,
    pub low_budget_warning: bool,
}

pub struct AssembledPrompt {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub lore_blocks: LoreBlocks,
    pub triggered_entry_ids: Vec<Uuid>,
    pub stats: TokenStats,
}

/// Precomputed, caller-supplied inputs for one assembly pass. Keeping this
/// as a struct-of-data separates the async retrieval work (memories, forced
/// lore ids) from this module's purely synchronous composition logic.
pub struct PromptInputs<'a> {
    pub card: &'a CharacterCard,
    pub user_alias: &'a str,
    pub lore_entries: &'a [LorebookEntry],
    pub history: &'a [ChatMessage],
    pub user_message: &'a str,
    pub memories: &'a [String],
    pub history_summary: Option<&'a str>,
    pub instruction_modules: &'a [String],
    pub forced_activation_ids: &'a HashSet<Uuid>,
    pub refined_history: Option<&'a str>,
    pub requested_history_budget: u32,
    pub model_limits: ModelLimits,
}

pub fn assemble(inputs: &PromptInputs) -> AssembledPrompt {
    let safe_input = (inputs.model_limits.context_window as i64
        - inputs.model_limits.max_output as i64
        - inputs.model_limits.safety_buffer as i64)
        .max(2000) as u32;
    let lore_budget = ((inputs.model_limits.context_window as f64) * 0.2)
        .clamp(500.0, 3000.0) as u32;

    let recent_history: Vec<String> = inputs
        .history
        .iter()
        .filter(|m| !m.is_archived)
        .map(|m| m.content.clone())
        .collect();

    let admitted = lorebook::activate(
        inputs.lore_entries,
        &recent_history,
        inputs.user_message,
        inputs.forced_activation_ids,
        lore_budget,
        30,
    );
    let triggered_entry_ids = admitted.iter().map(|e| e.id).collect();
    let lore_blocks = lorebook::build_blocks(&admitted);

    let role_block = render_role(inputs.card, inputs.user_alias);

    let mut system_parts = vec![role_block];
    if let Some(summary) = inputs.history_summary {
        if !summary.trim().is_empty() {
            system_parts.push(format!("【Previous Story Summary】\n{summary}"));
        }
    }
    if !inputs.memories.is_empty() {
        let block = inputs
            .memories
            .iter()
            .map(|m| format!("- {m}"))
            .collect::<Vec<_>>()
            .join("\n");
        system_parts.push(format!("【Recall / Long-term Memories】\n{block}"));
    }
    if !lore_blocks.before_char.is_empty() {
        system_parts.push(format!("【World Setting】\n{}", lore_blocks.before_char));
    }
    if !lore_blocks.after_char.is_empty() {
        system_parts.push(format!("【Additional Lore】\n{}", lore_blocks.after_char));
    }
    for module in inputs.instruction_modules {
        if !module.trim().is_empty() {
            system_parts.push(module.clone());
        }
    }
    let system_prompt = system_parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut user_parts = Vec::new();
    if !lore_blocks.before_user.is_empty() {
        user_parts.push(format!("【Scene Context】\n{}", lore_blocks.before_user));
    }
    user_parts.push(inputs.user_message.to_string());
    if !lore_blocks.after_user.is_empty() {
        user_parts.push(format!("【Note】\n{}", lore_blocks.after_user));
    }
    user_parts.push("(Remember: stay in character)".to_string());
    let final_user = user_parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let system_tokens = estimate_tokens(&system_prompt);
    let user_tokens = estimate_tokens(&final_user);

    let remaining = (safe_input as i64 - system_tokens as i64 - user_tokens as i64).max(0) as u32;
    let mut budget_history = inputs.requested_history_budget.min(remaining);
    let low_budget_warning = remaining < MIN_REMAINING_WARNING_THRESHOLD;

    let mut messages = Vec::new();
    let mut history_tokens_used = 0u32;

    if let Some(refined) = inputs.refined_history {
        let refined_cost = estimate_tokens(refined);
        if refined_cost <= budget_history {
            messages.push(ChatMessage {
                id: Uuid::new_v4(),
                session_id: String::new(),
                role: MessageRole::System,
                content: refined.to_string(),
                created_at: chrono::Utc::now(),
                is_archived: false,
            });
            budget_history -= refined_cost;
            history_tokens_used += refined_cost;
        }
    }

    let truncated = truncate_history(inputs.history, budget_history);
    history_tokens_used += truncated
        .iter()
        .map(|m| estimate_tokens(&m.content) + PER_MESSAGE_FRAMING_OVERHEAD)
        .sum::<u32>();
    messages.extend(truncated);

    messages.push(ChatMessage {
        id: Uuid::new_v4(),
        session_id: String::new(),
        role: MessageRole::User,
        content: final_user,
        created_at: chrono::Utc::now(),
        is_archived: false,
    });

    if low_budget_warning {
        warn!(remaining, "system+user prompt leaves little room for history");
    }
    debug!(
        system_tokens,
        user_tokens,
        budget_history,
        history_tokens_used,
        messages = messages.len(),
        "prompt assembled"
    );

    AssembledPrompt {
        system_prompt,
        messages,
        lore_blocks,
        triggered_entry_ids,
        stats: TokenStats {
            system_tokens,
            user_tokens,
            budget_history,
            history_tokens_used,
            budget_left: budget_history.saturating_sub(history_tokens_used),
            low_budget_warning,
        },
    }
}

/// Walk history in reverse (newest first), clipping overlong single
/// messages, admitting until the budget is exhausted, then re-reversing.
fn truncate_history(history: &[ChatMessage], budget: u32) -> Vec<ChatMessage> {
    if budget == 0 {
        return Vec::new();
    }

    let mut kept = Vec::new();
    let mut used = 0u32;

    for msg in history.iter().filter(|m| !m.is_archived).rev() {
        let mut content = msg.content.clone();
        if content.chars().count() > MAX_SINGLE_MSG_CHARS {
            let total = content.chars().count();
            content = content
                .chars()
                .skip(total - MAX_SINGLE_MSG_CHARS)
                .collect();
        }

        let cost = estimate_tokens(&content) + PER_MESSAGE_FRAMING_OVERHEAD;
        if used + cost > budget {
            break;
        }

        kept.push(ChatMessage {
            content,
            ..msg.clone()
        });
        used += cost;
    }

    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(role: MessageRole, content: &str) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4(),
            session_id: "s".into(),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
            is_archived: false,
        }
    }

    fn card() -> CharacterCard {
        CharacterCard {
            id: Uuid::nil(),
            name: "Ren".into(),
            description: "A hero".into(),
            persona: String::new(),
            scenario: String::new(),
            first_mes: String::new(),
            system_prompt: String::new(),
            creator_notes: String::new(),
            tags: vec![],
            alternate_greetings: vec![],
            user_alias: None,
        }
    }

    #[test]
    fn budget_enforcement_scenario() {
        // Context window 16000, max_output 4096, safety_buffer 500
        // -> SAFE_INPUT = 11404.
        let limits = ModelLimits {
            context_window: 16_000,
            max_output: 4_096,
            safety_buffer: 500,
        };

        // 200 messages of 80 CJK chars each -> estimate_tokens = floor(80*2)+1 = 161, +4 = 165/msg.
        let history: Vec<ChatMessage> = (0..200)
            .map(|i| {
                msg(
                    if i % 2 == 0 { MessageRole::User } else { MessageRole::Assistant },
                    &"测".repeat(80),
                )
            })
            .collect();

        let inputs = PromptInputs {
            card: &card(),
            user_alias: "Alex",
            lore_entries: &[],
            history: &history,
            user_message: "hi",
            memories: &[],
            history_summary: None,
            instruction_modules: &[],
            forced_activation_ids: &HashSet::new(),
            refined_history: None,
            requested_history_budget: u32::MAX,
            model_limits: limits,
        };

        let result = assemble(&inputs);
        assert!(result.stats.budget_history > 0);
        // system+user are small (a short description + "hi"), so almost
        // all of SAFE_INPUT should be available for history.
        assert!(result.stats.budget_history > 11_000);
    }

    #[test]
    fn low_remaining_budget_emits_warning_not_error() {
        let limits = ModelLimits {
            context_window: 2_200,
            max_output: 0,
            safety_buffer: 0,
        };
        let inputs = PromptInputs {
            card: &card(),
            user_alias: "Alex",
            lore_entries: &[],
            history: &[],
            user_message: &"x".repeat(7600),
            memories: &[],
            history_summary: None,
            instruction_modules: &[],
            forced_activation_ids: &HashSet::new(),
            refined_history: None,
            requested_history_budget: 4000,
            model_limits: limits,
        };
        let result = assemble(&inputs);
        assert!(result.stats.low_budget_warning);
    }

    #[test]
    fn history_truncation_keeps_newest_messages() {
        let history = vec![msg(MessageRole::User, "old"), msg(MessageRole::User, "new")];
        let truncated = truncate_history(&history, 100);
        assert_eq!(truncated.last().unwrap().content, "new");
    }

    #[test]
    fn archived_messages_excluded_from_truncation() {
        let mut archived = msg(MessageRole::User, "archived one");
        archived.is_archived = true;
        let history = vec![archived, msg(MessageRole::User, "active one")];
        let truncated = truncate_history(&history, 1000);
        assert_eq!(truncated.len(), 1);
        assert_eq!(truncated[0].content, "active one");
    }
}
