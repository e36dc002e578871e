//! The per-call retry state machine.
//!
//! One logical generation call against one provider/wire-API combination
//! runs here: candidate URLs in order, transient-status retry with
//! exponential backoff and jitter, immediate failure on non-transient
//! statuses, and strict success criteria (status < 400, JSON
//! content-type, parseable body, non-empty extracted text). Every failure
//! is recorded in an [`ErrorAccumulator`] so the caller gets the most
//! actionable one, not merely the last.

use crate::classify::{self, ErrorAccumulator, Failure, FailureKind, Family};
use crate::extract::WireShape;
use crate::policy;
use crate::throttle::RateLimiter;
use crate::transport::{HttpTransport, TransportError};
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const MAX_ATTEMPTS: usize = 3;

/// Everything needed to run one logical call.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub family: Family,
    pub shape: WireShape,
    pub candidates: Vec<String>,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    /// Route through the process-wide throttle gate (abuse-sensitive
    /// gateways only).
    pub throttled: bool,
    /// When the upstream says the *model* has no channel, skip retries
    /// and surface the failure so the caller can substitute a model.
    pub fast_fail_on_model_unavailable: bool,
}

pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    throttle: Arc<RateLimiter>,
}

/// Candidate URLs may carry credentials in their query string (Gemini
/// sends the API key as `?key=...`), so only the part before `?` may
/// reach logs.
fn loggable_url(url: &str) -> &str {
    url.split_once('?').map_or(url, |(head, _)| head)
}

/// Backoff before attempt `n + 1`: `0.8 * 2^(n-1)` seconds plus up to
/// 200 ms of jitter.
fn backoff_delay(attempt: usize) -> Duration {
    let base = 0.8_f64 * f64::powi(2.0, attempt as i32 - 1);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..0.2);
    Duration::from_secs_f64(base + jitter)
}

/// Classify a decodable body that produced no text. A JSON document with
/// none of the known top-level markers is an unrecognized shape rather
/// than a genuinely empty completion.
fn empty_body_failure(family: Family, data: &Value) -> Failure {
    let recognized = ["choices", "output", "output_text", "candidates"]
        .iter()
        .any(|key| data.get(key).is_some());
    if recognized {
        Failure::empty_completion(family)
    } else {
        Failure::new(
            family,
            FailureKind::BadResponse,
            Some("unrecognized_shape".to_string()),
            true,
        )
    }
}

impl Executor {
    pub fn new(transport: Arc<dyn HttpTransport>, throttle: Arc<RateLimiter>) -> Self {
        Self { transport, throttle }
    }

    /// Run the full attempt/candidate loop for one plan.
    ///
    /// Returns the extracted text on the first success, or the
    /// best-ranked failure once the plan is exhausted.
    pub async fn execute(&self, plan: &RequestPlan) -> Result<String, Failure> {
        let mut acc = ErrorAccumulator::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut attempt_had_transient = false;

            for url in &plan.candidates {
                log::debug!(
                    "{} attempt {} -> {}",
                    plan.family.as_str(),
                    attempt,
                    loggable_url(url)
                );

                let result = {
                    let _permit = if plan.throttled {
                        Some(self.throttle.acquire().await)
                    } else {
                        None
                    };
                    self.transport
                        .post_json(url, &plan.headers, &plan.body)
                        .await
                };

                let reply = match result {
                    Ok(reply) => reply,
                    Err(TransportError::Timeout) => {
                        acc.record(Failure::timeout(plan.family));
                        attempt_had_transient = true;
                        continue;
                    }
                    Err(TransportError::Network(class)) => {
                        acc.record(Failure::network(plan.family, class));
                        attempt_had_transient = true;
                        continue;
                    }
                };

                if reply.status == 404 {
                    // Usually "wrong candidate path"; lowest priority and
                    // not worth a backoff round on its own.
                    acc.record(Failure::http(plan.family, 404, None));
                    continue;
                }

                if reply.status >= 400 {
                    let detail = classify::error_detail(&reply);
                    let failure = Failure::http(plan.family, reply.status, detail);

                    if failure.transient {
                        if plan.fast_fail_on_model_unavailable
                            && policy::looks_model_unavailable(&failure)
                        {
                            log::warn!(
                                "fast-fail on model-unavailable response: {}",
                                failure
                            );
                            acc.record(failure);
                            break;
                        }
                        acc.record(failure);
                        attempt_had_transient = true;
                        continue;
                    }

                    log::warn!("fatal upstream status: {}", failure);
                    return Err(failure);
                }

                let ctype = reply.content_type.to_ascii_lowercase();
                if !ctype.contains("application/json") {
                    // Some gateways serve an HTML landing page at the root.
                    acc.record(Failure::new(
                        plan.family,
                        FailureKind::NonJsonResponse,
                        None,
                        true,
                    ));
                    attempt_had_transient = true;
                    continue;
                }

                let data: Value = match serde_json::from_str(&reply.body) {
                    Ok(data) => data,
                    Err(_) => {
                        acc.record(Failure::new(plan.family, FailureKind::BadJson, None, true));
                        attempt_had_transient = true;
                        continue;
                    }
                };

                let text = plan.shape.extract_text(&data);
                if text.trim().is_empty() {
                    acc.record(empty_body_failure(plan.family, &data));
                    attempt_had_transient = true;
                    continue;
                }

                return Ok(text);
            }

            // A fast-fail break lands here with the failure recorded.
            if plan.fast_fail_on_model_unavailable {
                if let Some(best) = acc.best() {
                    if policy::looks_model_unavailable(best) {
                        break;
                    }
                }
            }

            if attempt < MAX_ATTEMPTS && attempt_had_transient {
                let delay = backoff_delay(attempt);
                log::debug!(
                    "{}: all candidates failed transiently, backing off {:?} before attempt {}",
                    plan.family.as_str(),
                    delay,
                    attempt + 1
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            break;
        }

        Err(acc.into_best().unwrap_or_else(|| {
            Failure::new(
                plan.family,
                FailureKind::BadResponse,
                Some("no_candidate_urls".to_string()),
                false,
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpReply, HttpTransport, TransportError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Mutex, OnceLock};

    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpReply, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn post_json(
            &self,
            url: &str,
            _headers: &[(String, String)],
            _body: &Value,
        ) -> Result<HttpReply, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Network("ScriptDrained".to_string())))
        }
    }

    fn json_reply(status: u16, body: Value) -> Result<HttpReply, TransportError> {
        Ok(HttpReply {
            status,
            content_type: "application/json".to_string(),
            body: body.to_string(),
        })
    }

    fn chat_plan(transport_urls: Vec<&str>, fast_fail: bool) -> RequestPlan {
        RequestPlan {
            family: Family::Openai,
            shape: WireShape::Chat,
            candidates: transport_urls.into_iter().map(String::from).collect(),
            headers: vec![],
            body: json!({"model": "gpt-4o-mini"}),
            throttled: false,
            fast_fail_on_model_unavailable: fast_fail,
        }
    }

    fn executor(transport: Arc<ScriptedTransport>) -> Executor {
        Executor::new(transport, Arc::new(RateLimiter::new()))
    }

    #[tokio::test]
    async fn test_success_on_first_candidate_makes_one_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![json_reply(
            200,
            json!({"choices": [{"message": {"content": "Hello"}}]}),
        )]));
        let exec = executor(transport.clone());
        let plan = chat_plan(vec!["https://h/v1/chat/completions", "https://h/chat/completions"], false);

        let text = exec.execute(&plan).await.unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_404_falls_through_to_next_candidate() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            json_reply(404, json!({"error": {"message": "not found"}})),
            json_reply(200, json!({"choices": [{"message": {"content": "second"}}]})),
        ]));
        let exec = executor(transport.clone());
        let plan = chat_plan(vec!["https://h/v1/chat/completions", "https://h/chat/completions"], false);

        let text = exec.execute(&plan).await.unwrap();
        assert_eq!(text, "second");
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_non_transient_status_is_fatal_immediately() {
        let transport = Arc::new(ScriptedTransport::new(vec![json_reply(
            401,
            json!({"error": {"message": "bad key"}}),
        )]));
        let exec = executor(transport.clone());
        let plan = chat_plan(vec!["https://h/v1/chat/completions", "https://h/chat/completions"], false);

        let failure = exec.execute(&plan).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Http(401));
        assert_eq!(failure.render(), "openai_http_401:bad key");
        // No second candidate, no retries.
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_then_recovers_after_backoff() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(HttpReply {
                status: 200,
                content_type: "text/html".to_string(),
                body: "<html>landing page</html>".to_string(),
            }),
            json_reply(200, json!({"choices": [{"message": {"content": "ok"}}]})),
        ]));
        let exec = executor(transport.clone());
        let plan = chat_plan(vec!["https://h/v1/chat/completions"], false);

        let start = std::time::Instant::now();
        let text = exec.execute(&plan).await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(transport.call_count(), 2);
        // One backoff round of at least 0.8s separated the attempts.
        assert!(start.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_best_failure() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            json_reply(404, json!({})),
            Ok(HttpReply {
                status: 502,
                content_type: "text/html".to_string(),
                body: "<html>502</html>".to_string(),
            }),
            json_reply(404, json!({})),
            json_reply(200, json!({"choices": [{"message": {"content": "  "}}]})),
            json_reply(404, json!({})),
            json_reply(404, json!({})),
        ]));
        let exec = executor(transport.clone());
        let plan = chat_plan(vec!["https://h/v1/chat/completions", "https://h/chat/completions"], false);

        let failure = exec.execute(&plan).await.unwrap_err();
        // The 502 outranks both the 404s and the empty completion.
        assert_eq!(failure.render(), "openai_http_502:html_error_page");
    }

    #[tokio::test]
    async fn test_fast_fail_on_model_unavailable() {
        let transport = Arc::new(ScriptedTransport::new(vec![json_reply(
            503,
            json!({"error": {"message": "no available distributor for this model"}}),
        )]));
        let exec = executor(transport.clone());
        let plan = chat_plan(vec!["https://h/v1/chat/completions"], true);

        let start = std::time::Instant::now();
        let failure = exec.execute(&plan).await.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Http(503));
        assert_eq!(transport.call_count(), 1);
        // No backoff rounds happened.
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_loggable_url_drops_query_string() {
        assert_eq!(
            loggable_url("https://h/v1beta/models/m:generateContent?key=secret"),
            "https://h/v1beta/models/m:generateContent"
        );
        assert_eq!(
            loggable_url("https://h/v1/chat/completions"),
            "https://h/v1/chat/completions"
        );
    }

    struct MemoryLog {
        records: Mutex<Vec<String>>,
    }

    impl log::Log for MemoryLog {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            self.records
                .lock()
                .unwrap()
                .push(format!("{}", record.args()));
        }

        fn flush(&self) {}
    }

    fn install_log_capture() -> &'static MemoryLog {
        static SINK: OnceLock<&'static MemoryLog> = OnceLock::new();
        *SINK.get_or_init(|| {
            let sink: &'static MemoryLog = Box::leak(Box::new(MemoryLog {
                records: Mutex::new(Vec::new()),
            }));
            log::set_logger(sink).unwrap();
            log::set_max_level(log::LevelFilter::Debug);
            sink
        })
    }

    #[tokio::test]
    async fn test_api_key_never_reaches_log_records() {
        let sink = install_log_capture();

        let transport = Arc::new(ScriptedTransport::new(vec![json_reply(
            200,
            json!({"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}),
        )]));
        let exec = executor(transport);
        let plan = RequestPlan {
            family: Family::Gemini,
            shape: WireShape::Gemini,
            candidates: crate::endpoints::gemini_candidates(
                "https://generativelanguage.googleapis.com",
                "gemini-1.5-flash",
                "SECRET-KEY-123",
            ),
            headers: vec![],
            body: json!({}),
            throttled: false,
            fast_fail_on_model_unavailable: false,
        };

        exec.execute(&plan).await.unwrap();

        let records = sink.records.lock().unwrap();
        let attempt_lines: Vec<&String> =
            records.iter().filter(|r| r.contains("attempt")).collect();
        assert!(!attempt_lines.is_empty(), "expected attempt logging");
        for record in records.iter() {
            assert!(
                !record.contains("SECRET-KEY-123"),
                "api key leaked into log output: {:?}",
                record
            );
        }
    }

    #[tokio::test]
    async fn test_unrecognized_json_shape_tagged_bad_response() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            json_reply(200, json!({"weird": true})),
            json_reply(200, json!({"choices": [{"message": {"content": "later"}}]})),
        ]));
        let exec = executor(transport.clone());
        let plan = chat_plan(vec!["https://h/v1/chat/completions"], false);

        let text = exec.execute(&plan).await.unwrap();
        assert_eq!(text, "later");
        assert_eq!(transport.call_count(), 2);
    }
}
