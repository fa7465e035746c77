//! C4: Lorebook Activator. Recursive, round-capped, token-budgeted
//! keyword/regex activation of world-knowledge entries.

use std::collections::HashSet;

use domain::{LorePosition, LorebookEntry, estimate_tokens};
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_RECURSION_DEPTH: usize = 5;
const DYNAMIC_SCAN_TEXT_CAP: usize = 5000;
const RECENT_HISTORY_WINDOW: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct LoreBlocks {
    pub before_char: String,
    pub after_char: String,
    pub before_user: String,
    pub after_user: String,
}

/// One lore entry plus its precompiled regex patterns (when `use_regex`),
/// compiled once per activation pass rather than once per round.
struct Candidate<'a> {
    entry: &'a LorebookEntry,
    compiled: Option<Vec<Regex>>,
}

fn compile_patterns(entry: &LorebookEntry) -> Option<Vec<Regex>> {
    if !entry.use_regex {
        return None;
    }
    let flags = if entry.case_sensitive { "" } else { "(?i)" };
    let patterns: Vec<Regex> = entry
        .unique_keywords()
        .into_iter()
        .filter_map(|kw| {
            let pattern = if entry.match_whole_word {
                format!(r"{flags}\b{kw}\b")
            } else {
                format!("{flags}{kw}")
            };
            // Invalid user-supplied regex is silently skipped, not
            // downgraded to substring matching.
            match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(err) => {
                    warn!(entry_id = %entry.id, %pattern, error = %err, "skipping invalid lore regex");
                    None
                }
            }
        })
        .collect();
    Some(patterns)
}

fn matches(candidate: &Candidate, haystack: &str) -> bool {
    if let Some(patterns) = &candidate.compiled {
        return patterns.iter().any(|re| re.is_match(haystack));
    }

    let keywords = candidate.entry.unique_keywords();
    if keywords.is_empty() {
        return false;
    }

    let haystack_norm = if candidate.entry.case_sensitive {
        haystack.to_string()
    } else {
        haystack.to_lowercase()
    };

    for kw in keywords {
        let needle = if candidate.entry.case_sensitive {
            kw.clone()
        } else {
            kw.to_lowercase()
        };
        if candidate.entry.match_whole_word {
            let pattern = format!(r"\b{}\b", regex::escape(&needle));
            if let Ok(re) = Regex::new(&pattern) {
                if re.is_match(&haystack_norm) {
                    return true;
                }
            }
        } else if haystack_norm.contains(&needle) {
            return true;
        }
    }
    false
}

/// Run the full activation pass and return admitted entries (already
/// budget/priority filtered), in activation-then-priority order.
pub fn activate<'a>(
    entries: &'a [LorebookEntry],
    recent_history: &[String],
    user_message: &str,
    forced_activation_ids: &HashSet<Uuid>,
    token_budget: u32,
    max_entries: usize,
) -> Vec<&'a LorebookEntry> {
    let recent: Vec<&String> = recent_history
        .iter()
        .rev()
        .take(RECENT_HISTORY_WINDOW)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let base_text = recent
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let base_scan_text = format!("{base_text}\n{user_message}");

    let candidates: Vec<Candidate> = entries
        .iter()
        .filter(|e| e.enabled && !e.content.trim().is_empty())
        .map(|entry| Candidate {
            entry,
            compiled: compile_patterns(entry),
        })
        .collect();

    let mut triggered_ids: HashSet<Uuid> = HashSet::new();
    let mut activated: Vec<&LorebookEntry> = Vec::new();
    let mut dynamic_scan_text = String::new();

    // Constant/forced entries activate unconditionally.
    for candidate in &candidates {
        let is_forced = forced_activation_ids.contains(&candidate.entry.id);
        if (candidate.entry.constant || is_forced) && triggered_ids.insert(candidate.entry.id) {
            activated.push(candidate.entry);
            dynamic_scan_text.push('\n');
            dynamic_scan_text.push_str(&candidate.entry.content);
        }
    }

    for _round in 0..MAX_RECURSION_DEPTH {
        let full_scan_text = format!("{base_scan_text}{dynamic_scan_text}");
        let mut round_hits: Vec<&Candidate> = Vec::new();

        for candidate in &candidates {
            if triggered_ids.contains(&candidate.entry.id) {
                continue;
            }
            if matches(candidate, &full_scan_text) {
                round_hits.push(candidate);
            }
        }

        if round_hits.is_empty() {
            break;
        }

        for hit in round_hits {
            triggered_ids.insert(hit.entry.id);
            activated.push(hit.entry);
            dynamic_scan_text.push('\n');
            dynamic_scan_text.push_str(&hit.entry.content);
        }

        if dynamic_scan_text.len() > DYNAMIC_SCAN_TEXT_CAP {
            let start = dynamic_scan_text.len() - DYNAMIC_SCAN_TEXT_CAP;
            // Keep only the most recent suffix; clamp to a char boundary.
            let mut boundary = start;
            while boundary < dynamic_scan_text.len() && !dynamic_scan_text.is_char_boundary(boundary) {
                boundary += 1;
            }
            dynamic_scan_text = dynamic_scan_text[boundary..].to_string();
        }
    }

    // Deterministic ordering: highest priority first, then declared order.
    activated.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.order.partial_cmp(&b.order).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut admitted = Vec::new();
    let mut used_tokens: u32 = 0;
    for entry in activated {
        if admitted.len() >= max_entries {
            break;
        }
        let cost = estimate_tokens(&entry.content);
        if used_tokens + cost > token_budget {
            continue;
        }
        used_tokens += cost;
        admitted.push(entry);
    }

    debug!(
        admitted = admitted.len(),
        triggered = triggered_ids.len(),
        budget_used = used_tokens,
        budget_total = token_budget,
        "lorebook activation pass complete"
    );

    admitted
}

/// Partition admitted entries by position into the four prompt-composition
/// slots, joined with double newlines. Unknown positions default to
/// `beforeChar` (handled upstream by `lore_position_or_default`).
pub fn build_blocks(admitted: &[&LorebookEntry]) -> LoreBlocks {
    let mut blocks = LoreBlocks::default();
    let mut before_char = Vec::new();
    let mut after_char = Vec::new();
    let mut before_user = Vec::new();
    let mut after_user = Vec::new();

    for entry in admitted {
        match entry.position {
            LorePosition::BeforeChar => before_char.push(entry.content.as_str()),
            LorePosition::AfterChar => after_char.push(entry.content.as_str()),
            LorePosition::BeforeUser => before_user.push(entry.content.as_str()),
            LorePosition::AfterUser => after_user.push(entry.content.as_str()),
        }
    }

    blocks.before_char = before_char.join("\n\n");
    blocks.after_char = after_char.join("\n\n");
    blocks.before_user = before_user.join("\n\n");
    blocks.after_user = after_user.join("\n\n");
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(
        id: Uuid,
        keywords: &[&str],
        content: &str,
        priority: f64,
        order: f64,
        constant: bool,
    ) -> LorebookEntry {
        LorebookEntry {
            id,
            lorebook_id: Uuid::nil(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            content: content.to_string(),
            enabled: true,
            priority,
            order,
            probability: 1.0,
            use_regex: false,
            case_sensitive: false,
            match_whole_word: false,
            exclude: false,
            constant,
            contextual: false,
            authors_note: None,
            position: LorePosition::BeforeChar,
        }
    }

    #[test]
    fn recursive_activation_chains_through_content() {
        let a_id = Uuid::new_v4();
        let b_id = Uuid::new_v4();
        let c_id = Uuid::new_v4();
        let a = entry(a_id, &["dragon"], "A dragon with fire breath", 3.0, 0.0, true);
        let b = entry(b_id, &["fire"], "fire that burns scale armor", 2.0, 0.0, false);
        let c = entry(c_id, &["scale"], "scale armor lore", 1.0, 0.0, false);
        let entries = vec![a, b, c];

        let admitted = activate(&entries, &[], "dragon", &HashSet::new(), 2048, 30);
        let ids: HashSet<Uuid> = admitted.iter().map(|e| e.id).collect();
        assert!(ids.contains(&a_id));
        assert!(ids.contains(&b_id));
        assert!(ids.contains(&c_id));
    }

    #[test]
    fn constant_and_forced_entries_always_activate() {
        let forced_id = Uuid::new_v4();
        let constant_id = Uuid::new_v4();
        let inactive_id = Uuid::new_v4();
        let forced = entry(forced_id, &["zzz-no-match"], "forced content", 1.0, 0.0, false);
        let constant = entry(constant_id, &["zzz-no-match2"], "constant content", 1.0, 0.0, true);
        let inactive = entry(inactive_id, &["zzz-no-match3"], "never matches", 1.0, 0.0, false);

        let mut forced_ids = HashSet::new();
        forced_ids.insert(forced_id);

        let admitted = activate(
            &[forced, constant, inactive],
            &[],
            "irrelevant message",
            &forced_ids,
            2048,
            30,
        );
        let ids: HashSet<Uuid> = admitted.iter().map(|e| e.id).collect();
        assert!(ids.contains(&forced_id));
        assert!(ids.contains(&constant_id));
        assert!(!ids.contains(&inactive_id));
    }

    #[test]
    fn whole_word_does_not_match_substring() {
        let id = Uuid::new_v4();
        let mut e = entry(id, &["cat"], "a cat fact", 1.0, 0.0, false);
        e.match_whole_word = true;
        let admitted = activate(&[e], &[], "concatenate this", &HashSet::new(), 2048, 30);
        assert!(admitted.is_empty());
    }

    #[test]
    fn budget_drops_low_priority_entries_but_keeps_high_priority() {
        let high_id = Uuid::new_v4();
        let low_id = Uuid::new_v4();
        let high = entry(high_id, &["x"], &"a".repeat(4000), 10.0, 0.0, true);
        let low = entry(low_id, &["x"], "small", 1.0, 0.0, true);
        let admitted = activate(&[high, low], &[], "x", &HashSet::new(), 100, 30);
        let ids: Vec<Uuid> = admitted.iter().map(|e| e.id).collect();
        assert!(!ids.contains(&high_id));
        assert!(ids.contains(&low_id));
    }

    #[test]
    fn invalid_regex_is_skipped_not_downgraded() {
        let id = Uuid::new_v4();
        let mut e = entry(id, &["("], "unmatched paren content", 1.0, 0.0, false);
        e.use_regex = true;
        let admitted = activate(&[e], &[], "(", &HashSet::new(), 2048, 30);
        assert!(admitted.is_empty());
    }
}
