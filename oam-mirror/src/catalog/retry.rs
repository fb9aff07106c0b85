use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{MirrorError, Result};

/// Outcome of one failed attempt, as classified by the caller.
#[derive(Debug, Clone)]
pub struct AttemptError {
    pub message: String,
    pub retryable: bool,
    /// Server-suggested delay (e.g. from `Retry-After`).
    pub retry_after: Option<Duration>,
}

impl AttemptError {
    /// A transient failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            retry_after: None,
        }
    }

    /// A failure that will not go away on retry.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Upper bound on a single retry delay, before jitter.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Exponential backoff with jitter for upstream fetches.
///
/// Delay for retry `n` is `base * 2^min(n, 5)` plus up to `max_jitter`. A
/// server-provided `Retry-After` is used as the delay itself, undoubled.
/// Either way the delay never exceeds `max_delay` before jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Default::default()
        }
    }

    /// Policy that retries immediately, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Caps any single delay, including a server-requested one.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let delay = match retry_after {
            Some(requested) => requested,
            None => self
                .base_delay
                .checked_mul(1u32 << retry.min(5))
                .unwrap_or(self.max_delay),
        }
        .min(self.max_delay);

        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return delay;
        }
        delay.saturating_add(Duration::from_millis(rand::rng().random_range(0..jitter_ms)))
    }

    /// Runs `operation` until it succeeds, fails fatally, or retries run out.
    ///
    /// Exhaustion is reported as [`MirrorError::Transport`] with the attempt count.
    pub async fn run<T, F, Fut>(&self, source_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let mut retry = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.retryable && retry < self.max_retries => {
                    let delay = self.backoff(retry, e.retry_after);
                    warn!(
                        source = source_name,
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e.message,
                        "Retryable fetch failure"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => {
                    return Err(MirrorError::transport(source_name, e.message, retry + 1));
                }
            }
        }
    }
}
