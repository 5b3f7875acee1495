use std::{future::Future, time::Duration};

use anyhow::Result;
use rand::Rng;
use shared::error::RemoteError;
use tracing::{info, warn};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// Bounded retry with exponential backoff, applied to one whole request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Equal jitter: a uniform pick between half the backoff and the full backoff.
    fn sleep_for(&self, retry: u32) -> Duration {
        let backoff = self.backoff(retry);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }
        let ceiling = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(ceiling / 2..=ceiling))
    }

    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        is_retryable: impl Fn(&anyhow::Error) -> bool,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "retry: succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < max_attempts && is_retryable(&err) => {
                    let delay = self.sleep_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retry: attempt failed, backing off: {err:#}"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Transient failures worth another attempt: server-side deadlocks, throttling, 502/503 gateway
/// replies, and connections that never reached the server. Timeouts after the request was sent,
/// including a 504 from the gateway, are not retried; the batch may already have been applied.
pub fn is_retryable_error(err: &anyhow::Error) -> bool {
    if let Some(remote) = err.downcast_ref::<RemoteError>() {
        return remote.is_retryable();
    }
    if let Some(http) = err.downcast_ref::<reqwest::Error>() {
        return http.is_connect();
    }
    format!("{err:#}").to_ascii_lowercase().contains("deadlock")
}
