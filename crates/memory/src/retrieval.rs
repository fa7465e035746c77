//! Keyword-candidate derivation and result fusion for C3's hybrid search.

/// Derive keyword candidates from a query per the spec's three-way rule:
/// short queries use adjacent bigrams, whitespace-bearing queries use
/// whitespace-delimited tokens, everything else uses the first/last 5
/// characters. Deduplicated, empty candidates dropped.
pub fn keyword_candidates(query: &str) -> Vec<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let mut candidates: Vec<String> = if chars.len() < 10 {
        chars
            .windows(2)
            .map(|pair| pair.iter().collect::<String>())
            .collect()
    } else if trimmed.contains(char::is_whitespace) {
        trimmed
            .split_whitespace()
            .filter(|tok| tok.chars().count() > 1)
            .map(str::to_string)
            .collect()
    } else {
        let head: String = chars.iter().take(5).collect();
        let tail: String = chars.iter().rev().take(5).collect::<Vec<_>>().into_iter().rev().collect();
        vec![head, tail]
    };

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| !c.is_empty() && seen.insert(c.clone()));
    candidates
}

/// Fuse vector-branch ids (ranked, first) with keyword-branch ids
/// (appended if not already present), truncated to `k`.
pub fn fuse_results<T: PartialEq + Clone>(vector_hits: Vec<T>, keyword_hits: Vec<T>, k: usize) -> Vec<T> {
    let mut fused = vector_hits;
    for hit in keyword_hits {
        if !fused.contains(&hit) {
            fused.push(hit);
        }
    }
    fused.truncate(k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_query_uses_bigrams() {
        let cands = keyword_candidates("abc");
        assert_eq!(cands, vec!["ab".to_string(), "bc".to_string()]);
    }

    #[test]
    fn whitespace_query_uses_tokens_longer_than_one_char() {
        let cands = keyword_candidates("a quick brown fox jumps over");
        assert!(cands.contains(&"quick".to_string()));
        assert!(!cands.contains(&"a".to_string()));
    }

    #[test]
    fn long_no_whitespace_query_uses_head_tail() {
        let cands = keyword_candidates("abcdefghijklmnop");
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0], "abcde");
        assert_eq!(cands[1], "lmnop");
    }

    #[test]
    fn fusion_appends_unique_keyword_hits() {
        let fused = fuse_results(vec![1, 2], vec![2, 3, 4], 3);
        assert_eq!(fused, vec![1, 2, 3]);
    }
}
