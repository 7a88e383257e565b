//! HTTP GET with timeout classification, jittered exponential backoff and
//! circuit-breaker bookkeeping. Shared by the Yahoo and FRED providers.

use super::circuit_breaker::CircuitBreaker;
use super::provider::DataError;
use rand::Rng;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use std::time::Duration;

/// Retry schedule for a single request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)` plus up
    /// to half a base delay of random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        let jitter_cap = (self.base_delay.as_millis() / 2) as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Build a blocking client with the given request timeout.
pub fn build_client(timeout: Duration) -> Result<Client, DataError> {
    Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
        .build()
        .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))
}

/// What a non-success status means for the request.
#[derive(Debug)]
pub(crate) enum StatusAction {
    /// Give up immediately with this error.
    Fail(DataError),
    /// Count a breaker failure and retry; this error stands if retries run out.
    Retry(DataError),
    /// Provider has blocked us.
    Trip,
}

/// Classify a non-success status. 400 and 404 are `SymbolNotFound`, 401 is
/// not retried, 403 trips the breaker, 429 and 5xx are retried.
pub(crate) fn classify_status(status: StatusCode, id: &str, retry_after: Option<u64>) -> StatusAction {
    match status {
        StatusCode::FORBIDDEN => StatusAction::Trip,
        StatusCode::UNAUTHORIZED => StatusAction::Fail(DataError::AuthenticationRequired(format!(
            "provider refused request for {id}"
        ))),
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => StatusAction::Fail(DataError::SymbolNotFound {
            symbol: id.to_string(),
        }),
        StatusCode::TOO_MANY_REQUESTS => StatusAction::Retry(DataError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        }),
        s if s.is_server_error() => StatusAction::Retry(DataError::ServerError {
            status: s.as_u16(),
            id: id.to_string(),
        }),
        s => StatusAction::Fail(DataError::Other(format!("HTTP {s} for {id}"))),
    }
}

/// GET `url`, returning the successful response.
///
/// `id` names the symbol or series in errors. See [`classify_status`] for
/// how failed statuses are handled.
pub(crate) fn get_with_retry(
    client: &Client,
    url: &str,
    id: &str,
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
) -> Result<Response, DataError> {
    if !breaker.is_allowed() {
        return Err(DataError::CircuitBreakerTripped);
    }

    let mut last_error = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            tracing::debug!(id, attempt, delay_ms = delay.as_millis() as u64, "retrying");
            std::thread::sleep(delay);
        }

        if !breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        match client.get(url).send() {
            Ok(resp) => {
                let status = resp.status();

                if status.is_success() {
                    breaker.record_success();
                    return Ok(resp);
                }

                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                match classify_status(status, id, retry_after) {
                    StatusAction::Trip => {
                        breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }
                    StatusAction::Fail(error) => return Err(error),
                    StatusAction::Retry(error) => {
                        breaker.record_failure();
                        tracing::debug!(id, %status, "retryable status");
                        last_error = Some(error);
                    }
                }
            }
            Err(e) if e.is_timeout() => {
                breaker.record_failure();
                last_error = Some(DataError::Timeout(format!("{id}: {e}")));
            }
            Err(e) if e.is_connect() => {
                breaker.record_failure();
                last_error = Some(DataError::NetworkUnreachable(format!("{id}: {e}")));
            }
            Err(e) => return Err(DataError::NetworkUnreachable(format!("{id}: {e}"))),
        }
    }

    Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
}
