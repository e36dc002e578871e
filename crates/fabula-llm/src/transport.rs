//! HTTP transport seam.
//!
//! The executor talks to upstream gateways through the [`HttpTransport`]
//! trait so the retry/fallback state machine can be exercised against a
//! scripted mock. The production implementation wraps a shared
//! `reqwest::Client` with a per-call timeout; there is no overall
//! deadline across a retry cascade, only this bound per attempt.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Default per-call timeout. Long enough for slow generations, short
/// enough to bound a hung attempt.
pub const DEFAULT_TIMEOUT_SECS: u64 = 75;

/// One HTTP response, decoded far enough for classification.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    /// Connection-level failure; the payload is a short failure class
    /// (never a full error chain) suitable for a tag suffix.
    #[error("network error: {0}")]
    Network(String),
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<HttpReply, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Short class name for a reqwest error, used as a tag suffix.
    fn classify(err: &reqwest::Error) -> String {
        if err.is_connect() {
            "Connect".to_string()
        } else if err.is_request() {
            "Request".to_string()
        } else if err.is_body() || err.is_decode() {
            "Body".to_string()
        } else {
            "Other".to_string()
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<HttpReply, TransportError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(Self::classify(&e))
            }
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(Self::classify(&e))
            }
        })?;

        Ok(HttpReply {
            status,
            content_type,
            body: text,
        })
    }
}
