//! Gateway-specific quirk knowledge, kept out of the retry machinery.
//!
//! Everything in this module is vendor trivia: which hosts speak the
//! Google GenAI protocol, which proxy flags multi-path probing as abusive
//! traffic, which error phrases mean "this model has no upstream channel
//! right now". The executor and facade consult these tables but contain
//! none of the trivia themselves, so it can be updated or removed without
//! touching the core algorithm.

use crate::classify::Failure;

/// Hosts that are the real Google Generative Language API (as opposed to
/// third-party proxies exposing Gemini models).
const GOOGLE_GENAI_HOSTS: &[&str] = &[
    "generativelanguage.googleapis.com",
    "genai.googleapis.com",
];

/// Proxy gateways known to flag endpoint probing and bursty traffic as
/// abuse. Requests to these hosts use exactly one documented endpoint and
/// go through the throttle gate.
const SENSITIVE_GATEWAY_HOSTS: &[&str] = &["packyapi.com"];

/// Upstream phrases that mean the *model* (not the network) is the
/// problem: the gateway has no channel/distributor for it right now.
/// Blind retry does not help this class; the caller should substitute an
/// alternate model instead.
const MODEL_UNAVAILABLE_PHRASES: &[&str] = &[
    "no distributor",
    "no available distributor",
    "no available channel",
    "no candidate channel",
    "model not exist",
    "model_not_found",
    "does not exist or you do not have access",
];

/// Gemini model identifiers worth substituting when the configured one has
/// no upstream channel. Ordered by preference; known-volatile, so callers
/// can inject their own list via `LlmGateway::with_fallback_models`.
pub fn default_gemini_fallback_models() -> Vec<String> {
    [
        "gemini-2.0-flash",
        "gemini-1.5-flash",
        "gemini-1.5-pro",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn is_google_genai_base(base_url: &str) -> bool {
    let u = base_url.to_ascii_lowercase();
    GOOGLE_GENAI_HOSTS.iter().any(|host| u.contains(host))
}

pub fn is_sensitive_gateway(base_url: &str) -> bool {
    let u = base_url.to_ascii_lowercase();
    SENSITIVE_GATEWAY_HOSTS.iter().any(|host| u.contains(host))
}

/// Heuristic: does this failure look like "model/channel unavailable"?
pub fn looks_model_unavailable(failure: &Failure) -> bool {
    let detail = match failure.detail.as_deref() {
        Some(d) => d.to_ascii_lowercase(),
        None => return false,
    };
    MODEL_UNAVAILABLE_PHRASES
        .iter()
        .any(|phrase| detail.contains(phrase))
}

/// A static hint appended to the final error when a recognized
/// proxy-specific dead end is detected, so operators know what to try
/// next without reading gateway dashboards.
pub fn operator_hint(base_url: &str, failure: &Failure) -> Option<&'static str> {
    if is_sensitive_gateway(base_url) && looks_model_unavailable(failure) {
        return Some(
            "hint: this gateway routes Gemini models through rotating upstream channels; \
             try gemini-2.0-flash or gemini-1.5-flash, or switch the project to an \
             OpenAI-compatible model",
        );
    }
    None
}
