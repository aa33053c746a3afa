//! Bounded retry with exponential backoff for playlist and segment requests.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::HlsError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped,
    /// plus up to half a base delay of jitter that never crosses the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if !self.jitter {
            return delay;
        }

        let headroom = self.max_delay.saturating_sub(delay);
        let spread = (self.base_delay / 2).min(headroom);
        let spread_ms = u64::try_from(spread.as_millis()).unwrap_or(u64::MAX);
        if spread_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..spread_ms))
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy is exhausted. The closure receives the 0-based attempt number.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, HlsError>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, HlsError>>,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(HlsError::Cancelled);
        }
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempt >= policy.max_retries => return Err(e),
            Err(e) => e,
        };

        let delay = policy.backoff(attempt);
        attempt += 1;
        warn!(
            attempt,
            max = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying HLS request"
        );
        tokio::select! {
            _ = token.cancelled() => return Err(HlsError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(100), Duration::from_secs(1))
            .without_jitter()
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = policy(5);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_secs(1));
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_under_cap() {
        let policy = RetryPolicy::new(3, Duration::from_millis(400), Duration::from_millis(500));
        for _ in 0..32 {
            let delay = policy.backoff(0);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_until_exhausted() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(2), &token, |_| {
            calls.fetch_add(1, Ordering::Relaxed);
            async {
                Err(HlsError::Timeout {
                    url: "https://x/a.m3u8".to_string(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(HlsError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_fail_fast() {
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&policy(2), &token, |_| {
            calls.fetch_add(1, Ordering::Relaxed);
            async {
                Err(HlsError::HttpStatus {
                    status: reqwest::StatusCode::NOT_FOUND,
                    url: "https://x/a.m3u8".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_attempt_succeeds() {
        let token = CancellationToken::new();
        let result = with_retry(&policy(2), &token, |attempt| async move {
            if attempt == 0 {
                Err(HlsError::HttpStatus {
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    url: "https://x/a.m3u8".to_string(),
                })
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let result = with_retry(&policy(2), &token, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(HlsError::Cancelled)));
    }
}
