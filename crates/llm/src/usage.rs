use serde::Serialize;
use serde_json::Value;

/// Normalized token usage reported back to the caller in `tokenStats`.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct Usage {
    pub cache_hit: u64,
    pub cache_miss: u64,
    pub total: u64,
}

/// Normalize a vendor's raw `usage` object into `{cacheHit, cacheMiss, total}`.
///
/// - DeepSeek: `prompt_cache_hit_tokens` → cacheHit.
/// - Claude-compatible: `cache_read_input_tokens` → cacheHit.
/// - Unknown vendors: best-effort field probing across common aliases.
///
/// `cacheMiss` is `prompt_tokens.saturating_sub(cacheHit)` — the input side
/// of the bill, not `total_tokens` (which also counts completion tokens).
pub fn normalize_usage(model: &str, raw: Option<&Value>) -> Usage {
    let Some(raw) = raw else {
        return Usage::default();
    };

    let total = pick(raw, &["total_tokens"]).unwrap_or(0);
    let prompt = pick(raw, &["prompt_tokens", "input_tokens"]).unwrap_or(0);

    let model_lower = model.to_lowercase();
    let cache_hit = if model_lower.contains("deepseek") {
        pick(raw, &["prompt_cache_hit_tokens"]).unwrap_or(0)
    } else if model_lower.contains("claude") {
        pick(raw, &["cache_read_input_tokens"]).unwrap_or(0)
    } else {
        pick(
            raw,
            &[
                "prompt_cache_hit_tokens",
                "cache_read_input_tokens",
                "cached_tokens",
            ],
        )
        .unwrap_or(0)
    };

    Usage {
        cache_hit,
        cache_miss: prompt.saturating_sub(cache_hit),
        total,
    }
}

fn pick(raw: &Value, keys: &[&str]) -> Option<u64> {
    for key in keys {
        if let Some(v) = raw.get(*key).and_then(Value::as_u64) {
            return Some(v);
        }
        // Some providers nest cache fields under `prompt_tokens_details`.
        if let Some(v) = raw
            .get("prompt_tokens_details")
            .and_then(|d| d.get(*key))
            .and_then(Value::as_u64)
        {
            return Some(v);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deepseek_usage_normalization() {
        let raw = json!({
            "prompt_tokens": 1000,
            "prompt_cache_hit_tokens": 400,
            "total_tokens": 1200
        });
        let usage = normalize_usage("deepseek-chat", Some(&raw));
        assert_eq!(usage.cache_hit, 400);
        assert_eq!(usage.cache_miss, 800);
        assert_eq!(usage.total, 1200);
    }

    #[test]
    fn claude_usage_normalization() {
        let raw = json!({
            "prompt_tokens": 900,
            "cache_read_input_tokens": 300,
            "total_tokens": 1000
        });
        let usage = normalize_usage("claude-3-5-sonnet", Some(&raw));
        assert_eq!(usage.cache_hit, 300);
        assert_eq!(usage.cache_miss, 600);
    }

    #[test]
    fn unknown_vendor_without_usage() {
        assert_eq!(normalize_usage("some-model", None), Usage::default());
    }
}
