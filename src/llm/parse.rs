//! Helpers for reading structure out of free-form judge replies.

use crate::error::{GraderError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static JSON_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)(\[.*\]|\{.*\})").expect("valid JSON block pattern"));

/// Outcome of reading one expected shape from a judge reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Malformed { reason: String },
}

impl<T> ParseOutcome<T> {
    pub fn malformed(reason: impl Into<String>) -> Self {
        ParseOutcome::Malformed {
            reason: reason.into(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseOutcome::Parsed(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            ParseOutcome::Parsed(value) => Some(value),
            ParseOutcome::Malformed { .. } => None,
        }
    }

    /// Convert to a `Result`, mapping `Malformed` to [`GraderError::LlmParse`].
    pub fn into_result(self) -> Result<T> {
        match self {
            ParseOutcome::Parsed(value) => Ok(value),
            ParseOutcome::Malformed { reason } => Err(GraderError::LlmParse(reason)),
        }
    }
}

/// Extract the first JSON array or object from a reply.
///
/// Tries the outermost bracketed span first, then the whole reply.
pub fn extract_json(response: &str) -> Result<Value> {
    if let Some(found) = JSON_BLOCK.find(response) {
        if let Ok(value) = serde_json::from_str::<Value>(found.as_str()) {
            return Ok(value);
        }
    }

    serde_json::from_str::<Value>(response.trim()).map_err(|_| {
        GraderError::LlmParse("Could not extract valid JSON from response".to_string())
    })
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Render a JSON scalar as plain text (strings without quotes).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
