//! Structured results parsed from completion text
//!
//! Models wrap JSON in prose or code fences; the outermost `{...}` span is
//! taken as the payload.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

use crate::error::LlmError;

fn object_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?s)\{.*\}").ok())
        .as_ref()
}

/// The outermost JSON object in `text`, if any
pub fn extract_json_object(text: &str) -> Option<&str> {
    object_pattern()?.find(text).map(|m| m.as_str())
}

/// Parse a structured reply, tolerating surrounding prose
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Ok(value);
    }

    let candidate = extract_json_object(text)
        .ok_or_else(|| LlmError::MalformedResponse(format!("no JSON object in: {}", preview(text))))?;

    serde_json::from_str(candidate).map_err(|e| LlmError::MalformedResponse(e.to_string()))
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(80).collect();
    if text.chars().count() > 80 {
        preview.push_str("...");
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Scores {
        score: f64,
    }

    #[test]
    fn test_extract_from_code_fence() {
        let text = "Here you go:\n```json\n{\"score\": 0.5}\n```\nThanks";
        assert_eq!(extract_json_object(text), Some("{\"score\": 0.5}"));
    }

    #[test]
    fn test_parse_plain_and_wrapped() {
        assert_eq!(parse_json::<Scores>("{\"score\": 1.0}").unwrap(), Scores { score: 1.0 });
        assert_eq!(
            parse_json::<Scores>("Result: {\"score\": 0.25} done").unwrap(),
            Scores { score: 0.25 }
        );
    }

    #[test]
    fn test_missing_object_is_malformed() {
        let err = parse_json::<Scores>("I cannot answer that.").unwrap_err();
        assert!(matches!(err, LlmError::MalformedResponse(_)));
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let err = parse_json::<Scores>("{\"other\": true}").unwrap_err();
        assert!(matches!(err, LlmError::MalformedResponse(_)));
    }
}
