//! Bounded exponential backoff for upstream requests.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagKbError, Result};

/// Retry schedule: `max_retries` retries after the first attempt, doubling
/// the delay from `base_delay_ms` up to `max_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// A policy that never waits, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, 0, 0)
    }

    /// Delay before retry number `attempt` (0-based). A server `Retry-After`
    /// hint takes precedence, still capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32, err: &RagKbError) -> Duration {
        let ms = match err.retry_after_secs() {
            Some(secs) => secs.saturating_mul(1000),
            None => self.base_delay_ms.saturating_mul(1u64 << attempt.min(20)),
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt, &err);
                    tracing::warn!(
                        request = label,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
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
        let policy = RetryPolicy::new(5, 100, 1_000);
        let err = RagKbError::Network("reset".into());
        assert_eq!(policy.delay_for(0, &err), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1, &err), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, &err), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4, &err), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(63, &err), Duration::from_millis(1_000));
    }

    #[test]
    fn retry_after_hint_wins() {
        let policy = RetryPolicy::new(5, 100, 10_000);
        let err = RagKbError::from_status(429, "", Some(2));
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = RetryPolicy::immediate(3)
            .run("test", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(RagKbError::from_status(503, "busy", None))
                } else {
                    Ok(n)
                }
            })
            .await
            .expect("eventually ok");
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let err = RetryPolicy::immediate(2)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RagKbError::Network("down".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NetworkError");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let _ = RetryPolicy::immediate(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RagKbError::from_status(401, "nope", None))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
