//! Response parsing: raw model text → `serde_json::Value`.
//!
//! The parser decodes; it does not validate against the schema field set
//! (that is [`crate::validate`]'s job). The one concession to real model
//! behaviour is stripping a single outer Markdown code fence, which chat-style
//! providers add even when asked for bare JSON.

use crate::error::MalformedResponseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Characters of the offending text quoted in a [`MalformedResponseError`].
const EXCERPT_CHARS: usize = 120;

static OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A\s*```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*\z")
        .expect("fence regex is valid")
});

/// Decode `text` as JSON.
///
/// With `strip_fences`, a single outer ```` ```json … ``` ```` wrapper is
/// removed first. Anything that is still not JSON fails.
pub fn parse_response(text: &str, strip_fences: bool) -> Result<Value, MalformedResponseError> {
    let body = if strip_fences { strip_code_fence(text) } else { text };

    serde_json::from_str(body).map_err(|e| MalformedResponseError {
        detail: e.to_string(),
        line: e.line(),
        column: e.column(),
        excerpt: excerpt(text),
    })
}

/// Remove one outer Markdown code fence, if the whole text is fenced.
pub fn strip_code_fence(text: &str) -> &str {
    match OUTER_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text,
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    let mut out: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    if trimmed.chars().count() > EXCERPT_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_json_decodes_to_equal_value() {
        let doc = json!({
            "invoice_details": {"invoice_number": "INV-001", "invoice_date": "2024-03-15"},
            "item_details": [{"item_quantity": 2, "item_rate": 150.5}]
        });
        let text = serde_json::to_string_pretty(&doc).unwrap();
        assert_eq!(parse_response(&text, true).unwrap(), doc);
        assert_eq!(parse_response(&text, false).unwrap(), doc);
    }

    #[test]
    fn not_json_is_malformed() {
        let err = parse_response("not json", true).unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.excerpt, "not json");
    }

    #[test]
    fn truncated_object_is_malformed() {
        let err = parse_response("{\"seller_details\": {\"seller_name\": \"Acme", true).unwrap_err();
        assert!(err.detail.contains("EOF"), "got: {}", err.detail);
    }

    #[test]
    fn html_error_page_is_malformed() {
        let html = "<!DOCTYPE html><html><body><h1>502 Bad Gateway</h1></body></html>";
        let err = parse_response(html, true).unwrap_err();
        assert!(err.excerpt.starts_with("<!DOCTYPE"));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_response(text, true).unwrap(), json!({"a": 1}));
        assert_eq!(strip_code_fence("```\n[1, 2]\n```\n"), "[1, 2]");
    }

    #[test]
    fn fence_stripping_can_be_disabled() {
        assert!(parse_response("```json\n{\"a\": 1}\n```", false).is_err());
    }

    #[test]
    fn prose_around_fence_is_not_stripped() {
        let text = "Here is the invoice:\n```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(text), text);
        assert!(parse_response(text, true).is_err());
    }

    #[test]
    fn long_excerpt_is_truncated() {
        let text = "x".repeat(500);
        let err = parse_response(&text, true).unwrap_err();
        assert_eq!(err.excerpt.chars().count(), EXCERPT_CHARS + 1);
        assert!(err.excerpt.ends_with('…'));
    }
}
