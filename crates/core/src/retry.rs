//! Bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, SyncError};

/// Retry budget for a single logical request (one page, one token grant).
///
/// Transient failures consume the budget. `429` responses wait for the
/// provider's retry delay and do not consume it; they are only bounded by
/// `max_rate_limit_waits` so a provider that never recovers cannot pin a
/// worker forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_rate_limit_waits: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_rate_limit_waits: 20,
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_rate_limit_waits: 20,
        }
    }

    /// Backoff before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts the budget.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        let mut rate_limit_waits = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(SyncError::RateLimited { retry_after })
                    if rate_limit_waits < self.max_rate_limit_waits =>
                {
                    rate_limit_waits += 1;
                    warn!(
                        label,
                        wait_ms = retry_after.as_millis() as u64,
                        rate_limit_waits,
                        "Rate limited, waiting before retry"
                    );
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_rate_limit_waits: 1,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SyncError::TransientNetwork("503".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::immediate(3)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::TransientNetwork("reset".into())) }
            })
            .await;
        assert!(matches!(result, Err(SyncError::TransientNetwork(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::immediate(5)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Authentication("401".into())) }
            })
            .await;
        assert!(matches!(result, Err(SyncError::Authentication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limits_do_not_consume_budget() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(1)
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(SyncError::RateLimited {
                            retry_after: Duration::from_millis(1),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
