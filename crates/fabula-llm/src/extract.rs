//! Text extraction from heterogeneous response shapes.
//!
//! Proxy gateways are sloppy about which JSON shape they return: chat
//! endpoints sometimes emit a `responses`-style `output_text`, content
//! arrives as a string or a list of typed parts, and Gemini candidates
//! may be missing any level of their nesting. Extractors here are total:
//! a structural mismatch yields an empty string, and the executor treats
//! empty as a retryable `empty_completion`, never a hard error.

use serde_json::Value;

/// The response shape to extract generated text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
    Chat,
    Responses,
    Gemini,
}

impl WireShape {
    pub fn extract_text(&self, data: &Value) -> String {
        match self {
            WireShape::Chat => extract_chat_text(data),
            WireShape::Responses => extract_responses_text(data),
            WireShape::Gemini => extract_gemini_text(data),
        }
    }
}

fn parts_text(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

/// Chat-completions shape: `choices[0].message.content`, either a plain
/// string or a list of content parts; falls back to `choices[0].text`,
/// then to a top-level `output_text` some gateways emit even here.
pub fn extract_chat_text(data: &Value) -> String {
    let choice = &data["choices"][0];

    match &choice["message"]["content"] {
        Value::String(s) => return s.clone(),
        Value::Array(parts) => {
            let text = parts_text(parts);
            if !text.is_empty() {
                return text;
            }
        }
        _ => {}
    }

    if let Some(text) = choice["text"].as_str() {
        return text.to_string();
    }

    if let Some(text) = data["output_text"].as_str() {
        return text.to_string();
    }

    String::new()
}

/// Responses-API shape: top-level `output_text` first, then a walk of the
/// `output` list collecting `content[].text`, then the chat extractor as
/// a cross-shape last resort.
pub fn extract_responses_text(data: &Value) -> String {
    if let Some(text) = data["output_text"].as_str() {
        return text.to_string();
    }

    if let Some(output) = data["output"].as_array() {
        let mut collected = String::new();
        for item in output {
            if let Some(content) = item["content"].as_array() {
                collected.push_str(&parts_text(content));
            }
        }
        if !collected.is_empty() {
            return collected;
        }
    }

    extract_chat_text(data)
}

/// Gemini shape: concatenation of `candidates[0].content.parts[].text`.
pub fn extract_gemini_text(data: &Value) -> String {
    match data["candidates"][0]["content"]["parts"].as_array() {
        Some(parts) => parts_text(parts),
        None => String::new(),
    }
}
