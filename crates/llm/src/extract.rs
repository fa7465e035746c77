/// Decode a structured reply from free-form LLM text.
///
/// Tries, in order:
/// 1. the content of a fenced ```json code block;
/// 2. a bare JSON value spanning the first `{` to the last `}` in the
///    trimmed response.
///
/// Returns `None` rather than erroring on anything ambiguous or invalid —
/// callers treat a failed extraction as "no structured output", never as
/// a hard failure.
pub fn extract_json_output<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(json_start) = after_fence.find(|c: char| !c.is_whitespace()) {
            let json_body = &after_fence[json_start..];
            if let Some(fence_end) = json_body.find("```") {
                let json_str = json_body[..fence_end].trim();
                if let Ok(val) = serde_json::from_str(json_str) {
                    return Some(val);
                }
            }
        }
    }

    let trimmed = response.trim();
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                let candidate = &trimmed[start..=end];
                if let Ok(val) = serde_json::from_str(candidate) {
                    return Some(val);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Facts {
        facts: Vec<String>,
    }

    #[test]
    fn extracts_fenced_json() {
        let raw = "Here you go:\n```json\n{\"facts\":[\"likes tea\"]}\n```";
        let out: Facts = extract_json_output(raw).unwrap();
        assert_eq!(out.facts, vec!["likes tea".to_string()]);
    }

    #[test]
    fn extracts_bare_json() {
        let raw = "preamble {\"facts\":[\"a\",\"b\"]} trailing";
        let out: Facts = extract_json_output(raw).unwrap();
        assert_eq!(out.facts, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn returns_none_on_garbage() {
        assert!(extract_json_output::<Facts>("no json here").is_none());
        assert!(extract_json_output::<Facts>("").is_none());
    }

    #[test]
    fn returns_none_on_malformed_braces() {
        assert!(extract_json_output::<Facts>("{ unterminated").is_none());
    }
}
