//! The generation facade.
//!
//! [`LlmGateway::generate_text`] is the single entry point the pipeline
//! orchestrator calls. It hides provider and wire-API selection, the
//! cross-wire fallback cascades, and fallback-model substitution. The
//! contract: either non-empty text comes back, or exactly one error
//! carrying the most actionable tag accumulated across every branch
//! attempted.

use crate::classify::{ErrorAccumulator, Failure, FailureKind, Family};
use crate::config::{LlmConfig, Provider, WireApi};
use crate::endpoints;
use crate::errors::LlmError;
use crate::executor::{Executor, RequestPlan};
use crate::extract::WireShape;
use crate::policy;
use crate::throttle::RateLimiter;
use crate::transport::{HttpTransport, ReqwestTransport};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Serialize)]
struct GeminiRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

fn chat_body(model: &str, system_prompt: &str, user_prompt: &str, cfg: &LlmConfig) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": user_prompt},
        ],
        "temperature": cfg.temperature,
        "max_tokens": cfg.max_tokens,
    })
}

fn responses_body(model: &str, system_prompt: &str, user_prompt: &str, cfg: &LlmConfig) -> Value {
    json!({
        "model": model,
        "instructions": system_prompt,
        "input": user_prompt,
        "temperature": cfg.temperature,
        "max_output_tokens": cfg.max_tokens,
    })
}

fn gemini_body(system_prompt: &str, user_prompt: &str, cfg: &LlmConfig) -> Value {
    let request = GeminiRequest {
        system_instruction: GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: system_prompt.to_string(),
            }],
        },
        contents: vec![GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart {
                text: user_prompt.to_string(),
            }],
        }],
        generation_config: GeminiGenerationConfig {
            temperature: cfg.temperature,
            max_output_tokens: cfg.max_tokens,
        },
    };
    serde_json::to_value(request).unwrap_or(Value::Null)
}

/// Provider-agnostic LLM gateway.
///
/// Construct once and share: the throttle gate inside is process-wide
/// state, and per-call construction would defeat its spacing guarantees.
pub struct LlmGateway {
    executor: Executor,
    fallback_models: Vec<String>,
}

impl LlmGateway {
    pub fn new() -> Self {
        Self::with_transport(Arc::new(ReqwestTransport::default()))
    }

    /// Build a gateway over a custom transport (tests, instrumentation).
    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            executor: Executor::new(transport, Arc::new(RateLimiter::new())),
            fallback_models: policy::default_gemini_fallback_models(),
        }
    }

    /// Replace the fallback-model cascade. The default list tracks
    /// known-volatile vendor identifiers; callers with fresher knowledge
    /// should inject their own.
    pub fn with_fallback_models(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    /// Generate text for one (system prompt, user prompt) pair.
    ///
    /// Fails fast with `missing_api_key_for_provider:{provider}` before
    /// any network call when no credential is configured. There is no
    /// overall deadline: worst-case wall clock is bounded by attempts ×
    /// per-call timeout × cascade branches.
    pub async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cfg: &LlmConfig,
    ) -> Result<String, LlmError> {
        let api_key = match cfg.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key,
            _ => {
                let family = match cfg.provider {
                    Provider::OpenAI => Family::Openai,
                    Provider::Gemini => Family::Gemini,
                };
                return Err(LlmError::Generation(
                    Failure::missing_api_key(family, cfg.provider.as_str()).render(),
                ));
            }
        };

        match cfg.provider {
            Provider::OpenAI => {
                self.generate_openai(system_prompt, user_prompt, cfg, api_key)
                    .await
            }
            Provider::Gemini => {
                if policy::is_google_genai_base(&cfg.base_url) {
                    self.generate_gemini_google(system_prompt, user_prompt, cfg, api_key)
                        .await
                } else {
                    self.generate_gemini_proxy(system_prompt, user_prompt, cfg, api_key)
                        .await
                }
            }
        }
    }

    fn openai_plan(
        &self,
        wire_api: WireApi,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        cfg: &LlmConfig,
        api_key: &str,
        fast_fail: bool,
    ) -> RequestPlan {
        let (path, shape, body) = match wire_api {
            WireApi::Chat => (
                "chat/completions",
                WireShape::Chat,
                chat_body(model, system_prompt, user_prompt, cfg),
            ),
            WireApi::Responses => (
                "responses",
                WireShape::Responses,
                responses_body(model, system_prompt, user_prompt, cfg),
            ),
        };
        RequestPlan {
            family: Family::Openai,
            shape,
            candidates: endpoints::openai_candidates(&cfg.base_url, path),
            headers: vec![("Authorization".to_string(), format!("Bearer {}", api_key))],
            body,
            throttled: policy::is_sensitive_gateway(&cfg.base_url),
            fast_fail_on_model_unavailable: fast_fail,
        }
    }

    fn gemini_plan(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        cfg: &LlmConfig,
        api_key: &str,
        fast_fail: bool,
    ) -> RequestPlan {
        RequestPlan {
            family: Family::Gemini,
            shape: WireShape::Gemini,
            candidates: endpoints::gemini_candidates(&cfg.base_url, model, api_key),
            headers: Vec::new(),
            body: gemini_body(system_prompt, user_prompt, cfg),
            throttled: policy::is_sensitive_gateway(&cfg.base_url),
            fast_fail_on_model_unavailable: fast_fail,
        }
    }

    /// OpenAI provider: preferred wire API first, then the other one.
    /// When both fail, report the better-ranked error and keep the other
    /// as an `alt=` suffix so partial failures stay visible.
    async fn generate_openai(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cfg: &LlmConfig,
        api_key: &str,
    ) -> Result<String, LlmError> {
        let preferred = cfg.wire_api;
        let alternate = match preferred {
            WireApi::Chat => WireApi::Responses,
            WireApi::Responses => WireApi::Chat,
        };

        let first_plan =
            self.openai_plan(preferred, &cfg.model, system_prompt, user_prompt, cfg, api_key, false);
        let first_err = match self.executor.execute(&first_plan).await {
            Ok(text) => return Ok(text),
            Err(failure) => failure,
        };

        log::warn!(
            "openai {:?} wire failed ({}), trying {:?}",
            preferred,
            first_err,
            alternate
        );

        let second_plan =
            self.openai_plan(alternate, &cfg.model, system_prompt, user_prompt, cfg, api_key, false);
        let second_err = match self.executor.execute(&second_plan).await {
            Ok(text) => return Ok(text),
            Err(failure) => failure,
        };

        // Later branch wins ties, matching the accumulator's rule.
        let (best, other) = if second_err.score() >= first_err.score() {
            (second_err, first_err)
        } else {
            (first_err, second_err)
        };
        let best_tag = best.render();
        let other_tag = other.render();
        let message = if other_tag != best_tag {
            format!("{} (alt={})", best_tag, other_tag)
        } else {
            best_tag
        };
        Err(LlmError::Generation(message))
    }

    /// Gemini provider against the real Google endpoint: native wire
    /// shape only, with the executor probing `/v1beta` placement.
    async fn generate_gemini_google(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cfg: &LlmConfig,
        api_key: &str,
    ) -> Result<String, LlmError> {
        let plan = self.gemini_plan(&cfg.model, system_prompt, user_prompt, cfg, api_key, false);
        self.executor
            .execute(&plan)
            .await
            .map_err(|failure| LlmError::Generation(failure.render()))
    }

    /// Gemini provider behind a non-Google proxy. Some proxies expose
    /// Gemini models via the native wire shape, some only via the
    /// OpenAI-compatible one, and either side may lack an upstream
    /// channel for any given model identifier, so this cascades:
    /// native shape, native-shape fallback models, chat shape, then
    /// chat-shape fallback models.
    async fn generate_gemini_proxy(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        cfg: &LlmConfig,
        api_key: &str,
    ) -> Result<String, LlmError> {
        let mut acc = ErrorAccumulator::new();

        let plan = self.gemini_plan(&cfg.model, system_prompt, user_prompt, cfg, api_key, true);
        match self.executor.execute(&plan).await {
            Ok(text) => return Ok(text),
            Err(failure) => {
                let unavailable = policy::looks_model_unavailable(&failure);
                log::warn!("gemini wire at proxy failed: {}", failure);
                acc.record(failure);

                if unavailable {
                    for model in self.fallback_candidates(&cfg.model) {
                        log::info!("trying fallback model {} via gemini wire", model);
                        let plan = self.gemini_plan(
                            &model, system_prompt, user_prompt, cfg, api_key, true,
                        );
                        match self.executor.execute(&plan).await {
                            Ok(text) => return Ok(text),
                            Err(failure) => acc.record(failure),
                        }
                    }
                }
            }
        }

        let plan = self.openai_plan(
            WireApi::Chat,
            &cfg.model,
            system_prompt,
            user_prompt,
            cfg,
            api_key,
            true,
        );
        match self.executor.execute(&plan).await {
            Ok(text) => return Ok(text),
            Err(failure) => {
                let unavailable = policy::looks_model_unavailable(&failure);
                log::warn!("openai-compatible wire at proxy failed: {}", failure);
                acc.record(failure);

                if unavailable {
                    for model in self.fallback_candidates(&cfg.model) {
                        log::info!("trying fallback model {} via openai-compatible wire", model);
                        let plan = self.openai_plan(
                            WireApi::Chat,
                            &model,
                            system_prompt,
                            user_prompt,
                            cfg,
                            api_key,
                            true,
                        );
                        match self.executor.execute(&plan).await {
                            Ok(text) => return Ok(text),
                            Err(failure) => acc.record(failure),
                        }
                    }
                }
            }
        }

        let best = acc.into_best().unwrap_or_else(|| {
            Failure::new(
                Family::Gemini,
                FailureKind::BadResponse,
                Some("no_branches_attempted".to_string()),
                false,
            )
        });
        let mut message = best.render();
        if let Some(hint) = policy::operator_hint(&cfg.base_url, &best) {
            message = format!("{} ({})", message, hint);
        }
        Err(LlmError::Generation(message))
    }

    fn fallback_candidates(&self, configured: &str) -> Vec<String> {
        self.fallback_models
            .iter()
            .filter(|m| m.as_str() != configured)
            .cloned()
            .collect()
    }
}

impl Default for LlmGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            provider: Provider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: Some("sk-test".to_string()),
            temperature: 0.7,
            max_tokens: 800,
            wire_api: WireApi::Chat,
        }
    }

    #[test]
    fn test_chat_body_fields() {
        let cfg = test_config();
        let body = chat_body("gpt-4o-mini", "be brief", "hello", &cfg);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["max_tokens"], 800);
    }

    #[test]
    fn test_responses_body_fields() {
        let cfg = test_config();
        let body = responses_body("gpt-4o-mini", "be brief", "hello", &cfg);
        assert_eq!(body["instructions"], "be brief");
        assert_eq!(body["input"], "hello");
        assert_eq!(body["max_output_tokens"], 800);
        assert!(body.get("messages").is_none());
    }

    #[test]
    fn test_gemini_body_wire_names() {
        let cfg = test_config();
        let body = gemini_body("be brief", "hello", &cfg);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 800);
        // The system instruction carries no role on the wire.
        assert!(body["systemInstruction"].get("role").is_none());
    }
}
