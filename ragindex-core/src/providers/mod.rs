//! Remote capability providers.
//!
//! Concrete HTTP backends for the embedding and answer-generation
//! capabilities, plus the shared retry loop every remote call goes through.

pub mod gemini;

use std::future::Future;
use std::time::Duration;

use crate::error::{ProviderError, RetryExhausted};

pub use crate::config::RetryConfig;
pub use gemini::{GeminiEmbedder, GeminiGenerator, ModelInfo, list_models};

/// The default Google Generative Language API base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Execute an async operation with exponential backoff retry.
///
/// At most `config.max_attempts` attempts are made. Permanent errors (see
/// [`ProviderError::is_retryable`]) stop the loop immediately. The result
/// carries the number of attempts made and the last error.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, RetryExhausted>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        attempt += 1;

        if !err.is_retryable() || attempt >= max_attempts {
            return Err(RetryExhausted {
                attempts: attempt,
                last: err,
            });
        }

        let backoff_ms = compute_backoff(config, attempt - 1, &err);
        tracing::warn!(
            attempt,
            max = max_attempts,
            backoff_ms,
            error = %err,
            "Retrying after transient error"
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }
}

/// Delay before the retry that follows failed attempt `attempt` (zero-based),
/// honoring a server-provided retry-after hint.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &ProviderError) -> u64 {
    let computed = backoff_delay(config, attempt);
    if let ProviderError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs.saturating_mul(1000);
        return server_ms.max(computed).min(config.max_backoff_ms);
    }
    computed
}

/// Pure exponential backoff: `initial * multiplier^attempt`, capped.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(exp);
    base.min(config.max_backoff_ms as f64) as u64
}

/// Build an HTTP client with the given per-request timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ProviderError::Connection {
            message: format!("Failed to build HTTP client: {}", e),
        })
}

/// Map a transport-level `reqwest` failure.
pub(crate) fn map_request_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            timeout_secs: timeout.as_secs(),
        }
    } else if err.is_connect() {
        ProviderError::Connection {
            message: err.to_string(),
        }
    } else {
        ProviderError::ApiRequest {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ProviderError {
        ProviderError::Connection {
            message: "reset".into(),
        }
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(&config, 0), 1000);
        assert_eq!(backoff_delay(&config, 1), 2000);
        assert_eq!(backoff_delay(&config, 2), 4000);
    }

    #[test]
    fn test_backoff_delay_capped() {
        let config = RetryConfig {
            max_backoff_ms: 5000,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(&config, 10), 5000);
    }

    #[test]
    fn test_rate_limit_hint_respected_within_cap() {
        let config = RetryConfig::default();
        let err = ProviderError::RateLimited {
            retry_after_secs: 7,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 7000);
        assert_eq!(compute_backoff(&RetryConfig::immediate(3), 0, &err), 0);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&RetryConfig::immediate(3), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = with_retry(&RetryConfig::immediate(3), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient())
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last, ProviderError::Connection { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_auth_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = with_retry(&RetryConfig::immediate(5), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::AuthFailed {
                    provider: "Gemini".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_sleeps_between_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        };
        let start = tokio::time::Instant::now();
        let err = with_retry(&config, || async { Err::<(), _>(transient()) })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        // 1s after the first failure, 2s after the second.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
