//! Exponential backoff for rate-limited context calls.
//!
//! Only [`ContextError::RateLimited`] is retried. The delay before retry `n`
//! (0-indexed) is `base_delay * 2^n`, so the defaults wait 1s, 2s, then 4s
//! before giving up and returning the last error.

use std::future::Future;
use std::time::Duration;
use parley_core::error::ContextError;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    pub fn from_config(config: &parley_config::RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.base_delay_ms))
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the given retry (0-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }

    /// Run `op`, retrying while it reports a rate limit.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, ContextError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ContextError>>,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limited() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    warn!(
                        op = op_name,
                        attempt = retry + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Context service rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn rate_limited() -> ContextError {
        ContextError::RateLimited { retry_after_secs: None }
    }

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_gives_four_attempts_then_fails() {
        let attempts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let policy = RetryPolicy::default();

        let recorded = attempts.clone();
        let result: Result<(), _> = policy
            .run("search", || {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(Instant::now());
                    Err(rate_limited())
                }
            })
            .await;

        assert!(matches!(result, Err(ContextError::RateLimited { .. })));

        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 4);
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(1000));
        assert!(gaps[0] < gaps[1]);
        assert!(gaps[1] < gaps[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_rate_limit() {
        let calls = Arc::new(Mutex::new(0u32));
        let policy = RetryPolicy::default();

        let counter = calls.clone();
        let result = policy
            .run("get_context", || {
                let counter = counter.clone();
                async move {
                    let mut n = counter.lock().unwrap();
                    *n += 1;
                    if *n < 3 { Err(rate_limited()) } else { Ok("context") }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "context");
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn other_errors_propagate_immediately() {
        let calls = Arc::new(Mutex::new(0u32));
        let policy = RetryPolicy::default();

        let counter = calls.clone();
        let result: Result<(), _> = policy
            .run("add_messages", || {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    Err(ContextError::Api { status: 500, message: "boom".into() })
                }
            })
            .await;

        assert!(matches!(result, Err(ContextError::Api { status: 500, .. })));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
