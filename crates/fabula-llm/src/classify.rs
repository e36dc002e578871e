//! Failure classification and ranking.
//!
//! Every failure inside the executor becomes a [`Failure`]: a typed tag
//! (kind + wire family + optional clipped detail + transient flag) that
//! renders to the documented string form only at the boundary. The
//! numeric score orders failures by actionability so that when several
//! attempts fail differently, the most informative one is reported: a
//! trailing 404 from probing the wrong candidate path must never bury an
//! earlier 502 with a real upstream message.

use crate::transport::HttpReply;
use serde_json::Value;
use std::fmt;

/// Maximum detail length carried inside a tag.
const DETAIL_CLIP: usize = 220;

/// HTTP statuses plausibly caused by temporary upstream conditions.
const TRANSIENT_STATUS: &[u16] = &[408, 409, 425, 429, 500, 502, 503, 504];

pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUS.contains(&status)
}

/// The wire-protocol family a failure is tagged under. Gemini models
/// reached through an OpenAI-compatible proxy fail with `Openai` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Openai,
    Gemini,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::Openai => "openai",
            Family::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-2xx status. 404 is special-cased throughout: it usually means
    /// "wrong candidate path" and ranks below everything else.
    Http(u16),
    Timeout,
    NetworkError,
    NonJsonResponse,
    BadJson,
    BadResponse,
    /// Syntactically valid response with no usable text.
    EmptyCompletion,
    /// Configuration error discovered before any network call.
    MissingApiKey,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub family: Family,
    pub kind: FailureKind,
    pub detail: Option<String>,
    pub transient: bool,
}

impl Failure {
    pub fn new(family: Family, kind: FailureKind, detail: Option<String>, transient: bool) -> Self {
        Self {
            family,
            kind,
            detail: detail.map(|d| clip(&d)),
            transient,
        }
    }

    pub fn http(family: Family, status: u16, detail: Option<String>) -> Self {
        Self::new(
            family,
            FailureKind::Http(status),
            detail,
            is_transient_status(status),
        )
    }

    pub fn timeout(family: Family) -> Self {
        Self::new(family, FailureKind::Timeout, None, true)
    }

    pub fn network(family: Family, detail: String) -> Self {
        Self::new(family, FailureKind::NetworkError, Some(detail), true)
    }

    pub fn empty_completion(family: Family) -> Self {
        Self::new(family, FailureKind::EmptyCompletion, None, true)
    }

    pub fn missing_api_key(family: Family, provider: &str) -> Self {
        Self::new(
            family,
            FailureKind::MissingApiKey,
            Some(provider.to_string()),
            false,
        )
    }

    /// Actionability score, monotonic by usefulness to an operator.
    pub fn score(&self) -> i32 {
        match self.kind {
            FailureKind::Http(404) => 0,
            FailureKind::NonJsonResponse => 10,
            FailureKind::BadJson => 20,
            FailureKind::BadResponse => 25,
            FailureKind::EmptyCompletion => 30,
            FailureKind::Timeout | FailureKind::NetworkError => 80,
            FailureKind::Http(_) => 90,
            FailureKind::MissingApiKey => 100,
        }
    }

    /// Render the documented string form: kind plus optional detail,
    /// colon-joined, family-prefixed where the wire protocol matters.
    pub fn render(&self) -> String {
        let base = match &self.kind {
            FailureKind::Http(status) => format!("{}_http_{}", self.family.as_str(), status),
            FailureKind::Timeout => format!("{}_timeout", self.family.as_str()),
            FailureKind::NetworkError => format!("{}_network_error", self.family.as_str()),
            FailureKind::NonJsonResponse => {
                format!("{}_non_json_response", self.family.as_str())
            }
            FailureKind::BadJson => format!("{}_bad_json", self.family.as_str()),
            FailureKind::BadResponse => format!("{}_bad_response", self.family.as_str()),
            FailureKind::EmptyCompletion => "empty_completion".to_string(),
            FailureKind::MissingApiKey => "missing_api_key_for_provider".to_string(),
        };
        match &self.detail {
            Some(d) if !d.is_empty() => format!("{}:{}", base, d),
            _ => base,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Clip a detail string to the tag budget, character-safe.
pub fn clip(s: &str) -> String {
    let t = s.trim();
    if t.chars().count() <= DETAIL_CLIP {
        return t.to_string();
    }
    let head: String = t.chars().take(DETAIL_CLIP - 3).collect();
    format!("{}...", head.trim_end())
}

/// Pull a short human detail out of an HTTP error reply.
///
/// JSON bodies yield `error.message` or `detail` when present; HTML
/// bodies are replaced with the literal `html_error_page` marker so raw
/// markup never reaches logs or the UI; anything else is clipped raw text.
pub fn error_detail(reply: &HttpReply) -> Option<String> {
    let ctype = reply.content_type.to_ascii_lowercase();
    if ctype.contains("application/json") {
        if let Ok(data) = serde_json::from_str::<Value>(&reply.body) {
            if let Some(msg) = data
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
            {
                if !msg.trim().is_empty() {
                    return Some(clip(msg));
                }
            }
            // Some gateways use {"detail": "..."}.
            if let Some(detail) = data.get("detail").and_then(Value::as_str) {
                if !detail.trim().is_empty() {
                    return Some(clip(detail));
                }
            }
        }
    }
    if ctype.contains("text/html") {
        return Some("html_error_page".to_string());
    }
    let clipped = clip(&reply.body);
    if clipped.is_empty() {
        None
    } else {
        Some(clipped)
    }
}

/// Explicit best/last accumulator threaded through attempt loops.
///
/// Recording keeps the last failure for completeness and the best-scored
/// one for reporting; ties go to the later failure, so an equally ranked
/// newer error (with a fresher detail) wins.
#[derive(Debug, Default, Clone)]
pub struct ErrorAccumulator {
    best: Option<Failure>,
    last: Option<Failure>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, failure: Failure) {
        let replace = match &self.best {
            None => true,
            Some(best) => failure.score() >= best.score(),
        };
        if replace {
            self.best = Some(failure.clone());
        }
        self.last = Some(failure);
    }

    pub fn best(&self) -> Option<&Failure> {
        self.best.as_ref()
    }

    pub fn last(&self) -> Option<&Failure> {
        self.last.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_none()
    }

    pub fn into_best(self) -> Option<Failure> {
        self.best
    }
}
