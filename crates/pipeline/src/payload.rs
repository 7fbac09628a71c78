//! Structured payloads embedded in free-form model responses.
//!
//! Plans, review findings, and full-file contracts all arrive as one JSON
//! object somewhere in a response: usually in a ```` ```json ```` fence,
//! sometimes in an unlabeled fence, sometimes bare.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```([A-Za-z0-9_-]*)[^\n]*\n([\s\S]*?)```").expect("static regex"));

/// Locates the JSON object in `text`.
///
/// Fences labelled `json` win over unlabeled fences, which win over the first
/// balanced `{...}` in the raw text.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let mut unlabeled: Option<&str> = None;
    for caps in FENCE.captures_iter(text) {
        let label = caps.get(1).map_or("", |m| m.as_str());
        let Some(body) = caps.get(2).map(|m| m.as_str().trim()) else {
            continue;
        };
        if !body.starts_with('{') {
            continue;
        }
        if label.eq_ignore_ascii_case("json") {
            return Some(body);
        }
        if label.is_empty() && unlabeled.is_none() {
            unlabeled = Some(body);
        }
    }
    unlabeled.or_else(|| balanced_object(text))
}

/// Extracts and deserializes the JSON object in `text`.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let raw = extract_json_object(text).ok_or_else(|| "no JSON object in response".to_string())?;
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON payload: {e}"))
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_fence_wins() {
        let text = "```\n{\"a\": 1}\n```\n```json\n{\"b\": 2}\n```";
        assert_eq!(extract_json_object(text), Some("{\"b\": 2}"));
    }

    #[test]
    fn unlabeled_fence_is_used_when_alone() {
        assert_eq!(extract_json_object("see:\n```\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
    }

    #[test]
    fn bare_object_respects_strings() {
        let text = "Result: {\"msg\": \"a } brace\", \"n\": {\"x\": 1}} trailing";
        assert_eq!(
            extract_json_object(text),
            Some("{\"msg\": \"a } brace\", \"n\": {\"x\": 1}}")
        );
    }

    #[test]
    fn parse_reports_missing_object() {
        let err = parse_json::<serde_json::Value>("nothing here").unwrap_err();
        assert!(err.contains("no JSON object"));
    }
}
