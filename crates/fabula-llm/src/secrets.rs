//! Secrets loading for LLM providers.
//!
//! Credentials never travel inside project settings; they come from the
//! environment or a local, gitignored JSON store written by the settings
//! UI. Environment variables take priority so CI and one-off overrides
//! keep working. Nothing in this module may log or print key material.

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;

/// Per-provider credentials and overrides, read-only to the gateway.
#[derive(Clone, Default, PartialEq)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: Option<String>,
    pub gemini_model: Option<String>,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn present(v: &Option<String>) -> &'static str {
            if v.as_deref().is_some_and(|s| !s.trim().is_empty()) {
                "***"
            } else {
                "none"
            }
        }
        f.debug_struct("Secrets")
            .field("openai_api_key", &present(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("gemini_api_key", &present(&self.gemini_api_key))
            .field("gemini_base_url", &self.gemini_base_url)
            .field("gemini_model", &self.gemini_model)
            .finish()
    }
}

/// Presence flags for display in a settings/status UI.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretsStatus {
    pub openai_api_key_present: bool,
    pub openai_base_url_present: bool,
    pub openai_model_present: bool,
    pub gemini_api_key_present: bool,
    pub gemini_base_url_present: bool,
    pub gemini_model_present: bool,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.and_then(|s| {
        let t = s.trim().to_string();
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    })
}

impl Secrets {
    /// Read secrets from environment variables only.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: non_blank(env::var("OPENAI_API_KEY").ok()),
            openai_base_url: non_blank(env::var("OPENAI_BASE_URL").ok()),
            openai_model: non_blank(env::var("OPENAI_MODEL").ok()),
            gemini_api_key: non_blank(env::var("GEMINI_API_KEY").ok()),
            gemini_base_url: non_blank(
                env::var("GEMINI_BASE_URL")
                    .or_else(|_| env::var("GOOGLE_GEMINI_BASE_URL"))
                    .ok(),
            ),
            gemini_model: non_blank(env::var("GEMINI_MODEL").ok()),
        }
    }

    /// Fill any missing field from a local JSON store file.
    ///
    /// The store maps variable names (either casing) to string values;
    /// blank or non-string entries are ignored. A missing or unreadable
    /// store is not an error.
    pub fn merged_with_store(mut self, path: &Path) -> Self {
        #[derive(Deserialize)]
        struct RawStore(HashMap<String, serde_json::Value>);

        let raw = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return self,
        };
        let store: HashMap<String, String> = match serde_json::from_str::<RawStore>(&raw) {
            Ok(RawStore(m)) => m
                .into_iter()
                .filter_map(|(k, v)| match v {
                    serde_json::Value::String(s) if !s.trim().is_empty() => {
                        Some((k, s.trim().to_string()))
                    }
                    _ => None,
                })
                .collect(),
            Err(_) => return self,
        };

        let get = |upper: &str, lower: &str| -> Option<String> {
            store.get(upper).or_else(|| store.get(lower)).cloned()
        };

        if self.openai_api_key.is_none() {
            self.openai_api_key = get("OPENAI_API_KEY", "openai_api_key");
        }
        if self.openai_base_url.is_none() {
            self.openai_base_url = get("OPENAI_BASE_URL", "openai_base_url");
        }
        if self.openai_model.is_none() {
            self.openai_model = get("OPENAI_MODEL", "openai_model");
        }
        if self.gemini_api_key.is_none() {
            self.gemini_api_key = get("GEMINI_API_KEY", "gemini_api_key");
        }
        if self.gemini_base_url.is_none() {
            self.gemini_base_url = get("GEMINI_BASE_URL", "gemini_base_url")
                .or_else(|| store.get("GOOGLE_GEMINI_BASE_URL").cloned());
        }
        if self.gemini_model.is_none() {
            self.gemini_model = get("GEMINI_MODEL", "gemini_model");
        }
        self
    }

    /// Environment first, then the local store at the conventional path.
    pub fn load() -> Self {
        Self::from_env().merged_with_store(Path::new("data/secrets.local.json"))
    }

    pub fn status(&self) -> SecretsStatus {
        SecretsStatus {
            openai_api_key_present: self.openai_api_key.is_some(),
            openai_base_url_present: self.openai_base_url.is_some(),
            openai_model_present: self.openai_model.is_some(),
            gemini_api_key_present: self.gemini_api_key.is_some(),
            gemini_base_url_present: self.gemini_base_url.is_some(),
            gemini_model_present: self.gemini_model.is_some(),
        }
    }
}
