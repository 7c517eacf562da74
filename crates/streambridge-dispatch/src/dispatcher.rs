//! Single-attempt webhook delivery.

use std::time::{Duration, Instant};

use streambridge_core::signing;
use streambridge_core::{DispatchOutcome, DispatchRequest};

/// Deadline for one delivery attempt.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("streambridge/", env!("CARGO_PKG_VERSION"));

/// Stateless webhook dispatcher. Retry orchestration lives in the retry
/// queue; this type only performs and classifies a single attempt.
#[derive(Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Sign and POST the payload. Never panics and never returns an error:
    /// every possible failure is folded into the outcome.
    pub async fn dispatch(&self, request: &DispatchRequest) -> DispatchOutcome {
        let start = Instant::now();

        tracing::info!(
            target_url = %request.target_url,
            streamer_key = %request.streamer_key,
            attempt = request.attempt,
            "dispatching webhook"
        );

        let body = match serde_json::to_vec(&request.payload) {
            Ok(body) => body,
            Err(err) => {
                return outcome_and_metrics(DispatchOutcome::failure(
                    format!("failed to serialize payload: {err}"),
                    start.elapsed(),
                ));
            }
        };

        let mut http_request = self
            .http
            .post(&request.target_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if !request.secret.is_empty() {
            let signature =
                signing::signature_header_value(request.algorithm, &request.secret, &body);
            http_request = http_request.header(&request.header_name, signature);
        }

        let response = match http_request.body(body).send().await {
            Ok(response) => response,
            Err(err) => {
                let reason = if err.is_timeout() {
                    format!("request timed out: {err}")
                } else {
                    format!("request failed: {err}")
                };
                return outcome_and_metrics(DispatchOutcome::failure(reason, start.elapsed()));
            }
        };

        let status = response.status();
        let outcome = DispatchOutcome {
            success: status.is_success(),
            status_code: Some(status.as_u16()),
            error: (!status.is_success()).then(|| format!("HTTP {}", status.as_u16())),
            elapsed: start.elapsed(),
        };

        tracing::info!(
            target_url = %request.target_url,
            streamer_key = %request.streamer_key,
            attempt = request.attempt,
            success = outcome.success,
            status_code = status.as_u16(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "webhook dispatch completed"
        );

        outcome_and_metrics(outcome)
    }
}

fn outcome_and_metrics(outcome: DispatchOutcome) -> DispatchOutcome {
    let result = if outcome.success { "success" } else { "failure" };
    metrics::counter!("dispatch_attempts_total", "result" => result).increment(1);
    outcome
}
