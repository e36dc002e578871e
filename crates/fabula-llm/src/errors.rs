//! Error types crossing the gateway boundary.
//!
//! Callers receive string tags, never raw transport errors. The tag
//! vocabulary is flat and greppable (`openai_http_502:html_error_page`,
//! `empty_completion`, `missing_api_key_for_provider:gemini`) so the
//! orchestrator can surface it as-is.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Generation failed; the payload is the most actionable failure tag
    /// accumulated across every attempt made.
    #[error("{0}")]
    Generation(String),
    /// Loose JSON parsing of model output failed.
    #[error("{0}")]
    Parsing(String),
}
