//! Exponential backoff with jitter for transport retries (spec §4.2).
//!
//! Grounded on the `open-agent-sdk` pattern referenced in the retrieval
//! pack ("Exponential backoff retry logic with jitter", a public `retry`
//! module alongside the HTTP client), adapted to this crate's `Error` type
//! and async runtime.

use std::time::Duration;

use rand::Rng;

use crate::error::Error;

/// Backoff parameters for transport retries. Mirrors the shape implied by
/// the pack's retry module: base delay, multiplicative growth, a ceiling,
/// and a capped attempt count.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given attempt (0-indexed), with up to 50% jitter
    /// applied on top of the exponential backoff, capped at `max_delay`.
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        let jitter_factor = rand::thread_rng().gen_range(0.5..1.0);
        Duration::from_secs_f64(capped * jitter_factor)
    }
}

/// Whether a transport error is worth retrying. Network errors and 429/5xx
/// API statuses are retryable; anything else (bad request, auth failure,
/// abort) is not.
pub fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Network(_) | Error::Transport(_) | Error::WebSocket(_) => true,
        Error::ApiStatus { status, .. } => *status == 429 || *status >= 500,
        Error::WebSocketUpgrade { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

/// Runs `op` under `config`'s retry policy, retrying while `is_retryable`
/// holds and attempts remain. Returns the last error if the budget is
/// exhausted.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < config.max_attempts && is_retryable(&err) => {
                tokio::time::sleep(config.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn non_retryable_errors_are_rejected() {
        assert!(!is_retryable(&Error::UnknownTool("x".into())));
        assert!(!is_retryable(&Error::Aborted));
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert!(is_retryable(&Error::ApiStatus {
            status: 429,
            body: String::new()
        }));
        assert!(is_retryable(&Error::ApiStatus {
            status: 503,
            body: String::new()
        }));
        assert!(!is_retryable(&Error::ApiStatus {
            status: 400,
            body: String::new()
        }));
    }

    #[tokio::test]
    async fn retries_until_success_within_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 1.0,
        };
        let calls2 = calls.clone();
        let result = with_retry(&config, move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::Transport("temporary".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
