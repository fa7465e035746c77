//! C8: Fact Extractor. Post-turn observer that prompts the utility model
//! for structured facts, dedupes via the vector store gateway, and writes
//! durable memories via the Memory Store.

use domain::Result;
use llm::{ChatMessage, GenerationParams, LlmClient, extract_json_output};
use memory::MemoryStore;
use serde::Deserialize;

const MIN_COMBINED_LENGTH: usize = 20;
const MIN_FACT_CONTENT_LENGTH: usize = 5;
const EXISTS_SIMILAR_THRESHOLD: f32 = 0.25;
const EXTRACTION_IMPORTANCE: u8 = 3;

const EXTRACTION_SYSTEM_PROMPT: &str = "\
Extract durable facts about the user from the conversation below. Return \
ONLY a JSON object of the form {\"facts\":[{\"subject\":\"...\",\"content\":\"...\"}]}. \
--- examples below are illustrative; do not extract facts from them --- \
Example: {\"facts\":[{\"subject\":\"user\",\"content\":\"prefers tea over coffee\"}]}";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFact {
    Plain(String),
    Structured {
        // `subject` is accepted but intentionally never persisted —
        // preserved for migration fidelity with the original extractor.
        #[allow(dead_code)]
        subject: Option<String>,
        content: String,
    },
}

impl RawFact {
    fn content(&self) -> &str {
        match self {
            RawFact::Plain(s) => s,
            RawFact::Structured { content, .. } => content,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FactsPayload {
    Wrapped { facts: Vec<RawFact> },
    Bare(Vec<RawFact>),
}

/// Parse a raw LLM reply into surviving fact strings (subject is
/// intentionally discarded — content is the only field persisted).
/// Returns `None` on malformed JSON; never errors.
pub fn parse_facts(raw_reply: &str) -> Option<Vec<String>> {
    let payload: FactsPayload = extract_json_output(raw_reply)?;
    let facts = match payload {
        FactsPayload::Wrapped { facts } => facts,
        FactsPayload::Bare(facts) => facts,
    };
    Some(
        facts
            .into_iter()
            .map(|f| f.content().to_string())
            .filter(|c| c.chars().count() >= MIN_FACT_CONTENT_LENGTH)
            .collect(),
    )
}

/// Should the turn even be submitted for extraction? Skip if either side
/// carries the compaction summary marker, or if combined length is trivial.
pub fn should_extract(user_message: &str, assistant_reply: &str) -> bool {
    if user_message.contains("摘要") || assistant_reply.contains("摘要") {
        return false;
    }
    user_message.len() + assistant_reply.len() >= MIN_COMBINED_LENGTH
}

pub struct FactExtractor {
    utility_client: LlmClient,
    utility_model: String,
    store: MemoryStore,
}

impl FactExtractor {
    pub fn new(utility_client: LlmClient, utility_model: impl Into<String>, store: MemoryStore) -> Self {
        Self {
            utility_client,
            utility_model: utility_model.into(),
            store,
        }
    }

    /// Run extraction for one turn. Never propagates a hard error to the
    /// caller — malformed LLM output or an upstream failure is logged and
    /// treated as "no facts extracted".
    pub async fn extract_and_store(&self, user_id: &str, user_message: &str, assistant_reply: &str) -> Result<usize> {
        if !should_extract(user_message, assistant_reply) {
            return Ok(0);
        }

        let request = vec![
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(format!("User: {user_message}\nAssistant: {assistant_reply}")),
        ];

        let completion = match self
            .utility_client
            .chat(&self.utility_model, &request, &GenerationParams::default())
            .await
        {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(error = %err, "fact extraction call failed; skipping this turn");
                return Ok(0);
            }
        };

        let Some(facts) = parse_facts(&completion.content) else {
            tracing::warn!("fact extraction response was not valid JSON; skipping this turn");
            return Ok(0);
        };

        let mut stored = 0;
        for fact in facts {
            match self.store.exists_similar(&fact, user_id, EXISTS_SIMILAR_THRESHOLD).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "dedup check failed; skipping fact");
                    continue;
                }
            }
            if let Err(err) = self.store.create(user_id, &fact, EXTRACTION_IMPORTANCE).await {
                tracing::warn!(error = %err, "failed to persist extracted fact");
                continue;
            }
            stored += 1;
        }

        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_facts_object() {
        let raw = r#"```json
        {"facts":[{"subject":"user","content":"likes spicy food"}]}
        ```"#;
        let facts = parse_facts(raw).unwrap();
        assert_eq!(facts, vec!["likes spicy food".to_string()]);
    }

    #[test]
    fn parses_bare_list_of_strings() {
        let raw = r#"[ "likes tea", "short" ]"#;
        let facts = parse_facts(raw).unwrap();
        assert_eq!(facts, vec!["likes tea".to_string(), "short".to_string()]);
    }

    #[test]
    fn filters_facts_shorter_than_minimum() {
        let raw = r#"{"facts":["ok","hi"]}"#;
        let facts = parse_facts(raw).unwrap();
        assert!(facts.is_empty());
    }

    #[test]
    fn returns_none_on_malformed_json() {
        assert!(parse_facts("not json at all").is_none());
    }

    #[test]
    fn skips_extraction_when_summary_marker_present() {
        assert!(!should_extract("normal message here", "【历史摘要】compacted"));
    }

    #[test]
    fn skips_extraction_for_trivial_combined_length() {
        assert!(!should_extract("hi", "yo"));
    }
}
