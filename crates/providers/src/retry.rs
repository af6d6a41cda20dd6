//! Shared retry wrapper for backend HTTP calls.
//!
//! Connection failures, 429 and 5xx responses are retried with exponential
//! backoff; every other non-2xx status fails on the first attempt.

use std::time::Duration;

use stepwise_core::error::ProviderError;
use tracing::{debug, warn};

/// Retry schedule: `max_retries` extra attempts, sleeping
/// `base_delay * 2^(n-1)` before the n-th retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Send the request produced by `build`, retrying transient failures.
///
/// `build` is called once per attempt since a `RequestBuilder` is consumed
/// by `send()`. On success the response is guaranteed to have a 2xx status.
pub async fn send_with_retry<F>(
    policy: RetryPolicy,
    backend: &str,
    build: F,
) -> Result<reqwest::Response, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut retry = 0;
    loop {
        let outcome = match build().send().await {
            Ok(response) => check_status(backend, response).await,
            Err(e) => Err(transport_error(e)),
        };

        match outcome {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.delay_for(retry);
                warn!(
                    backend,
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient provider failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                debug!(backend, attempts = retry + 1, error = %e, "Provider request failed");
                return Err(e);
            }
        }
    }
}

/// Maps a non-2xx response to the matching `ProviderError`.
pub async fn check_status(
    backend: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    let message = if body.is_empty() {
        format!("{backend} status: {status}")
    } else {
        format!("{backend} status: {status}: {body}")
    };

    Err(match code {
        429 => ProviderError::RateLimited(message),
        401 | 403 => ProviderError::AuthenticationFailed(message),
        _ => ProviderError::ApiError {
            status_code: code,
            message,
        },
    })
}

pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dead_url, serve};
    use axum::{Router, extract::State, http::StatusCode, routing::get};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_millis(5))
    }

    /// Serves `statuses` in order, repeating the last one.
    async fn scripted(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = (hits.clone(), Arc::new(statuses));
        let app = Router::new()
            .route(
                "/",
                get(
                    |State((hits, statuses)): State<(Arc<AtomicUsize>, Arc<Vec<u16>>)>| async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst);
                        let code = statuses[n.min(statuses.len() - 1)];
                        (StatusCode::from_u16(code).unwrap(), format!("reply {n}"))
                    },
                ),
            )
            .with_state(state);
        (serve(app).await, hits)
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let (url, hits) = scripted(vec![503, 500, 200]).await;
        let client = reqwest::Client::new();
        let response = send_with_retry(fast(), "test", || client.get(&url)).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "reply 2");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let (url, hits) = scripted(vec![429]).await;
        let client = reqwest::Client::new();
        let err = send_with_retry(fast(), "test", || client.get(&url)).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_fail_immediately() {
        let (url, hits) = scripted(vec![400]).await;
        let client = reqwest::Client::new();
        let err = send_with_retry(fast(), "ollama", || client.get(&url)).await.unwrap_err();
        match err {
            ProviderError::ApiError { status_code, message } => {
                assert_eq!(status_code, 400);
                assert!(message.starts_with("ollama status: 400"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried() {
        let (url, hits) = scripted(vec![401]).await;
        let client = reqwest::Client::new();
        let err = send_with_retry(fast(), "openai", || client.get(&url)).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_failures_are_retried() {
        let url = dead_url();
        let client = reqwest::Client::new();
        let attempts = AtomicUsize::new(0);
        let err = send_with_retry(fast(), "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            client.get(&url)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
