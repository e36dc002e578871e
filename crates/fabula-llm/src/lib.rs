//! Provider-agnostic LLM gateway for the Fabula writing assistant.
//!
//! This crate turns one logical "generate text" call into a resilient
//! conversation with unreliable upstream gateways. It normalizes two wire
//! protocols (OpenAI-style chat/responses completions and Google Gemini's
//! generateContent), probes ambiguous endpoint layouts, retries transient
//! failures with backoff, cascades across fallback models and wire formats,
//! and always surfaces the single most actionable error when everything
//! fails.
//!
//! # Architecture Overview
//!
//! - **Config resolution**: a loosely-typed settings blob plus a secrets
//!   source become an immutable [`LlmConfig`]
//! - **Endpoint probing**: candidate URL enumeration that tolerates base
//!   URLs with or without a `/v1` (or `/v1beta`) segment
//! - **Request execution**: per-call timeout, transient-status retry with
//!   exponential backoff and jitter, candidate fallback
//! - **Error classification**: every failure becomes a stable, greppable
//!   tag ranked by actionability
//! - **Traffic shaping**: a process-wide rate limiter applied to gateways
//!   known to flag bursty clients
//!
//! The single public entry point for callers is
//! [`LlmGateway::generate_text`].

pub mod classify;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod executor;
pub mod extract;
pub mod gateway;
pub mod json_loose;
pub mod policy;
pub mod secrets;
pub mod throttle;
pub mod transport;

pub use classify::{ErrorAccumulator, Failure, FailureKind, Family};
pub use config::{resolve_llm_config, LlmConfig, Provider, WireApi};
pub use errors::LlmError;
pub use extract::WireShape;
pub use gateway::LlmGateway;
pub use json_loose::parse_json_loose;
pub use secrets::Secrets;
pub use throttle::RateLimiter;
pub use transport::{HttpReply, HttpTransport, TransportError};
