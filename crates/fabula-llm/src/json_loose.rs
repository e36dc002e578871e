//! Best-effort JSON parsing of model output.
//!
//! Models asked for JSON still wrap it in code fences, preface it with
//! chatter, or trail off after the closing brace. This parser strips a
//! fence if present, tries a direct parse, and otherwise scans for the
//! first `{` or `[` and tries every slice ending at a closer, longest
//! first, until one parses.

use crate::errors::LlmError;
use serde_json::Value;

pub fn parse_json_loose(text: &str) -> Result<Value, LlmError> {
    let mut t = text.trim().to_string();
    if t.starts_with("```") {
        // Drop the fence line itself (``` or ```json).
        if let Some((_, rest)) = t.split_once('\n') {
            t = rest.to_string();
        }
        if let Some(stripped) = t.trim_end().strip_suffix("```") {
            t = stripped.to_string();
        }
        t = t.trim().to_string();
    }

    if let Ok(value) = serde_json::from_str::<Value>(&t) {
        return Ok(value);
    }

    let start = t
        .char_indices()
        .find(|(_, c)| *c == '{' || *c == '[')
        .map(|(i, _)| i)
        .ok_or_else(|| LlmError::Parsing("no_json_start".to_string()))?;

    // Byte offsets just past each closer, tried longest slice first.
    let ends: Vec<usize> = t
        .char_indices()
        .filter(|(i, c)| *i >= start && (*c == '}' || *c == ']'))
        .map(|(i, c)| i + c.len_utf8())
        .collect();

    for &end in ends.iter().rev() {
        if let Ok(value) = serde_json::from_str::<Value>(&t[start..end]) {
            return Ok(value);
        }
    }

    Err(LlmError::Parsing("json_parse_failed".to_string()))
}
