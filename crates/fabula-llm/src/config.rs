//! Config resolution for generation runs.
//!
//! Project settings arrive as a loosely-typed JSON blob edited by humans,
//! so every field here is parsed permissively: wrapping quotes are
//! stripped, numbers may arrive as strings, pasted endpoint URLs are
//! reduced to their base, and unknown providers fall back to OpenAI.
//! Resolution is total: it always produces a best-effort [`LlmConfig`],
//! and a missing API key is only discovered at generation time.

use crate::secrets::Secrets;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 800;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Full endpoint paths users paste instead of a base URL. Stripped during
/// normalization so candidate building cannot double up path segments.
const ENDPOINT_SUFFIXES: &[&str] = &[
    "/v1/chat/completions",
    "/chat/completions",
    "/v1/responses",
    "/responses",
];

/// Conservative model aliases seen in real project settings.
const MODEL_ALIASES: &[(&str, &str)] = &[("gpt4o", "gpt-4o"), ("gpt4o-mini", "gpt-4o-mini")];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Gemini => "gemini",
        }
    }
}

/// The request/response JSON contract an OpenAI-compatible endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireApi {
    Chat,
    Responses,
}

/// Immutable configuration for one generation run.
///
/// Never mutated after resolution; retries with adjusted parameters are
/// derived copies via the `with_*` methods.
#[derive(Clone, PartialEq)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub wire_api: WireApi,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never let the key reach logs or traces.
        let redacted_key = if self.api_key.is_some() { Some("***") } else { None };
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &redacted_key)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("wire_api", &self.wire_api)
            .finish()
    }
}

impl LlmConfig {
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    pub fn with_max_tokens(&self, max_tokens: u32) -> Self {
        Self {
            max_tokens,
            ..self.clone()
        }
    }

    pub fn with_temperature(&self, temperature: f64) -> Self {
        Self {
            temperature,
            ..self.clone()
        }
    }
}

pub fn strip_wrapping_quotes(s: &str) -> &str {
    let t = s.trim();
    let bytes = t.as_bytes();
    if t.len() >= 2 {
        let first = bytes[0];
        let last = bytes[t.len() - 1];
        if first == last && (first == b'"' || first == b'\'') {
            return t[1..t.len() - 1].trim();
        }
    }
    t
}

/// Normalize a user-supplied base URL.
///
/// Trims whitespace and trailing slashes, strips wrapping quotes, defaults
/// the scheme to https, and removes any known full-endpoint suffix so a
/// pasted `.../v1/chat/completions` URL still yields a usable base.
pub fn normalize_base_url(url: &str) -> String {
    let mut u = strip_wrapping_quotes(url).trim_end_matches('/').to_string();
    if !u.is_empty() && !u.starts_with("http://") && !u.starts_with("https://") {
        u = format!("https://{}", u.trim_start_matches('/'));
    }
    for suffix in ENDPOINT_SUFFIXES {
        if let Some(stripped) = u.strip_suffix(suffix) {
            u = stripped.trim_end_matches('/').to_string();
            break;
        }
    }
    u
}

/// Normalize a user-supplied model identifier.
///
/// Strips wrapping quotes, applies the alias table, and inserts the dash
/// vendors use after `gpt` when a bare `gpt<digit>...` name is given.
pub fn normalize_model_name(model: &str) -> String {
    let m = strip_wrapping_quotes(model);
    for (alias, canonical) in MODEL_ALIASES {
        if m.eq_ignore_ascii_case(alias) {
            return (*canonical).to_string();
        }
    }
    if let Ok(re) = Regex::new(r"^gpt(\d)") {
        if re.is_match(m) {
            return re.replace(m, "gpt-$1").to_string();
        }
    }
    m.to_string()
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn coerce_f64(v: Option<&Value>, default: f64) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn coerce_u32(v: Option<&Value>, default: u32) -> u32 {
    let parsed = match v {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n > 0 && n <= u32::MAX as u64 => n as u32,
        _ => default,
    }
}

/// Resolve an immutable [`LlmConfig`] from project settings and secrets.
///
/// Total over its input domain: unknown providers default to OpenAI,
/// unparseable sampling parameters fall back to the documented defaults,
/// and credentials always come from `secrets`, never from the settings
/// blob.
pub fn resolve_llm_config(settings: &Value, secrets: &Secrets) -> LlmConfig {
    let empty = Value::Object(serde_json::Map::new());
    let llm = match settings.get("llm") {
        Some(v) if v.is_object() => v,
        _ => &empty,
    };

    let provider = match llm.get("provider").and_then(Value::as_str) {
        Some("gemini") => Provider::Gemini,
        _ => Provider::OpenAI,
    };

    let temperature = coerce_f64(llm.get("temperature"), DEFAULT_TEMPERATURE);
    let max_tokens = coerce_u32(llm.get("max_tokens"), DEFAULT_MAX_TOKENS);

    match provider {
        Provider::OpenAI => {
            let section = llm.get("openai").cloned().unwrap_or(Value::Null);
            let wire_api = section
                .get("wire_api")
                .or_else(|| section.get("api"))
                .and_then(Value::as_str)
                .map(|s| {
                    let v = s.trim().to_ascii_lowercase();
                    if v == "responses" || v == "response" {
                        WireApi::Responses
                    } else {
                        WireApi::Chat
                    }
                })
                .unwrap_or(WireApi::Chat);
            let base_url = str_field(&section, "base_url")
                .or_else(|| secrets.openai_base_url.clone())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            let model = str_field(&section, "model")
                .or_else(|| secrets.openai_model.clone())
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
            LlmConfig {
                provider,
                model: normalize_model_name(&model),
                base_url: normalize_base_url(&base_url),
                api_key: secrets.openai_api_key.clone(),
                temperature,
                max_tokens,
                wire_api,
            }
        }
        Provider::Gemini => {
            let section = llm.get("gemini").cloned().unwrap_or(Value::Null);
            let base_url = str_field(&section, "base_url")
                .or_else(|| secrets.gemini_base_url.clone())
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());
            let model = str_field(&section, "model")
                .or_else(|| secrets.gemini_model.clone())
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
            LlmConfig {
                provider,
                model: normalize_model_name(&model),
                base_url: normalize_base_url(&base_url),
                api_key: secrets.gemini_api_key.clone(),
                temperature,
                max_tokens,
                wire_api: WireApi::Chat,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn openai_secrets() -> Secrets {
        Secrets {
            openai_api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_url_strips_full_endpoint_suffixes() {
        for suffix in ENDPOINT_SUFFIXES {
            let normalized =
                normalize_base_url(&format!("https://www.packyapi.com{}", suffix));
            assert_eq!(normalized, "https://www.packyapi.com", "suffix {}", suffix);
        }
    }

    #[test]
    fn test_base_url_scheme_defaulting_and_quotes() {
        assert_eq!(
            normalize_base_url("  \"api.openai.com/v1\"  "),
            "https://api.openai.com/v1"
        );
        assert_eq!(
            normalize_base_url("http://localhost:8080/"),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_model_alias_table() {
        assert_eq!(normalize_model_name("gpt4o"), "gpt-4o");
        assert_eq!(normalize_model_name("gpt4o-mini"), "gpt-4o-mini");
    }

    #[test]
    fn test_model_dash_insertion() {
        assert_eq!(normalize_model_name("gpt5.2"), "gpt-5.2");
        assert_eq!(normalize_model_name("gpt5.1-codex"), "gpt-5.1-codex");
        // Already dashed names are untouched.
        assert_eq!(normalize_model_name("gpt-4o"), "gpt-4o");
        assert_eq!(normalize_model_name("'gpt4o'"), "gpt-4o");
    }

    #[test]
    fn test_resolver_defaults_on_empty_settings() {
        let cfg = resolve_llm_config(&json!({}), &openai_secrets());
        assert_eq!(cfg.provider, Provider::OpenAI);
        assert_eq!(cfg.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(cfg.base_url, DEFAULT_OPENAI_BASE_URL);
        assert_eq!(cfg.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(cfg.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(cfg.wire_api, WireApi::Chat);
    }

    #[test]
    fn test_resolver_unknown_provider_falls_back_to_openai() {
        let cfg = resolve_llm_config(
            &json!({"llm": {"provider": "anthropic"}}),
            &openai_secrets(),
        );
        assert_eq!(cfg.provider, Provider::OpenAI);
    }

    #[test]
    fn test_resolver_coerces_string_numbers() {
        let cfg = resolve_llm_config(
            &json!({"llm": {"temperature": "0.2", "max_tokens": "1200"}}),
            &openai_secrets(),
        );
        assert_eq!(cfg.temperature, 0.2);
        assert_eq!(cfg.max_tokens, 1200);
    }

    #[test]
    fn test_resolver_bad_numbers_fall_back_to_defaults() {
        let cfg = resolve_llm_config(
            &json!({"llm": {"temperature": "warm", "max_tokens": "lots"}}),
            &openai_secrets(),
        );
        assert_eq!(cfg.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(cfg.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_resolver_wire_api_field() {
        let cfg = resolve_llm_config(
            &json!({"llm": {"openai": {"wire_api": "Responses"}}}),
            &openai_secrets(),
        );
        assert_eq!(cfg.wire_api, WireApi::Responses);

        let cfg = resolve_llm_config(
            &json!({"llm": {"openai": {"api": "response"}}}),
            &openai_secrets(),
        );
        assert_eq!(cfg.wire_api, WireApi::Responses);

        let cfg = resolve_llm_config(
            &json!({"llm": {"openai": {"wire_api": "completions"}}}),
            &openai_secrets(),
        );
        assert_eq!(cfg.wire_api, WireApi::Chat);
    }

    #[test]
    fn test_resolver_key_comes_only_from_secrets() {
        let cfg = resolve_llm_config(
            &json!({"llm": {"openai": {"api_key": "sk-from-settings"}}}),
            &Secrets::default(),
        );
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn test_resolver_gemini_section() {
        let secrets = Secrets {
            gemini_api_key: Some("g-key".to_string()),
            ..Default::default()
        };
        let cfg = resolve_llm_config(
            &json!({"llm": {"provider": "gemini", "gemini": {"model": "\"gemini-1.5-pro\""}}}),
            &secrets,
        );
        assert_eq!(cfg.provider, Provider::Gemini);
        assert_eq!(cfg.model, "gemini-1.5-pro");
        assert_eq!(cfg.base_url, DEFAULT_GEMINI_BASE_URL);
        assert_eq!(cfg.api_key.as_deref(), Some("g-key"));
    }

    #[test]
    fn test_resolver_is_idempotent() {
        let settings = json!({
            "llm": {
                "provider": "openai",
                "temperature": 0.3,
                "openai": {
                    "base_url": "https://www.packyapi.com/v1/chat/completions",
                    "model": "gpt5.1-codex",
                    "wire_api": "chat",
                }
            }
        });
        let a = resolve_llm_config(&settings, &openai_secrets());
        let b = resolve_llm_config(&settings, &openai_secrets());
        assert_eq!(a, b);
        assert_eq!(a.base_url, "https://www.packyapi.com");
        assert_eq!(a.model, "gpt-5.1-codex");
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let cfg = resolve_llm_config(&json!({}), &openai_secrets());
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("sk-test"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_derived_copies_leave_original_untouched() {
        let cfg = resolve_llm_config(&json!({}), &openai_secrets());
        let retry_cfg = cfg.with_max_tokens(200).with_temperature(0.0);
        assert_eq!(cfg.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(retry_cfg.max_tokens, 200);
        assert_eq!(retry_cfg.model, cfg.model);
    }
}
