//! Shared HTTP plumbing for the calendar and bot-service clients: one error
//! type, an explicit per-request timeout, and capped exponential retry with
//! Retry-After support.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token not found at {0}")]
    TokenNotFound(std::path::PathBuf),
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Build the shared reqwest client. Every network call in the engine goes
/// through a client constructed here so the timeout is never forgotten.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Turn a non-2xx response into an [`ApiError`], reading the body for the
/// message. 401 maps to `AuthExpired` so callers can trigger a refresh.
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ApiError::AuthExpired);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Api {
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Honor the server's Retry-After header on 429/503. Google sends it;
    /// the bot service does not, so its clients leave this off.
    pub honor_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
            honor_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// One attempt, no retries. For calls that create server-side state:
    /// retrying a request whose response was lost can double-create.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Retries without Retry-After parsing, for servers that never send it.
    pub fn backoff_only() -> Self {
        Self {
            honor_retry_after: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: reqwest::StatusCode) -> RetryDecision {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if policy.honor_retry_after {
        if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
            if let Ok(secs) = value.parse::<u64>() {
                return Duration::from_secs(secs.min(30));
            }
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send a request, retrying transient failures (429/408/5xx and transport
/// timeouts) with capped exponential backoff. Non-transient responses are
/// returned to the caller for status handling.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, ApiError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(ApiError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                let decision = retry_decision_for_status(status);
                if decision == RetryDecision::Retryable && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "http retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "http retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(ApiError::Http(err));
            }
        }
    }

    Err(ApiError::RefreshFailed("request exhausted retries".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_decision() {
        assert_eq!(
            retry_decision_for_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            RetryDecision::Retryable
        );
        assert_eq!(
            retry_decision_for_status(reqwest::StatusCode::BAD_GATEWAY),
            RetryDecision::Retryable
        );
        assert_eq!(
            retry_decision_for_status(reqwest::StatusCode::NOT_FOUND),
            RetryDecision::NonRetryable
        );
        assert_eq!(
            retry_decision_for_status(reqwest::StatusCode::UNAUTHORIZED),
            RetryDecision::NonRetryable
        );
    }

    #[test]
    fn test_retry_delay_respects_retry_after() {
        let policy = RetryPolicy::default();
        let header = reqwest::header::HeaderValue::from_static("3");
        let delay = retry_delay(1, &policy, Some(&header));
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn test_retry_delay_caps_backoff() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 2_000,
            ..RetryPolicy::default()
        };
        let delay = retry_delay(4, &policy, None);
        // 1000 * 2^3 = 8000, capped at 2000 (+ <150ms jitter)
        assert!(delay < Duration::from_millis(2_200));
    }

    #[test]
    fn test_backoff_only_ignores_retry_after() {
        let policy = RetryPolicy::backoff_only();
        let header = reqwest::header::HeaderValue::from_static("20");
        let delay = retry_delay(1, &policy, Some(&header));
        // the 20s server hint is ignored; normal backoff applies
        assert!(delay < Duration::from_millis(policy.initial_backoff_ms + 150));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::single_attempt();
        assert_eq!(policy.max_attempts, 1);
    }
}
