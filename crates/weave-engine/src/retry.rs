use std::future::Future;
use std::time::Duration;

use tracing::warn;

use weave_core::config::RetryConfig;
use weave_core::error::{Result, WeaveError};

/// Exponential backoff for transient service errors.
///
/// Attempt `n` (0-based) that fails transiently waits
/// `min(initial * 2^n, max)` before attempt `n + 1`. At most
/// `max_retries + 1` attempts are made.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let initial = self.initial_backoff.as_millis() as u64;
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let ms = initial
            .saturating_mul(factor)
            .min(self.max_backoff.as_millis() as u64);
        if self.jitter {
            // 0.8x to 1.2x
            let jitter = 0.8 + rand::random::<f64>() * 0.4;
            Duration::from_millis((ms as f64 * jitter) as u64)
        } else {
            Duration::from_millis(ms)
        }
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    ///
    /// `op` receives the 0-based attempt number. `on_retry` is called with
    /// the attempt about to be made, the delay before it, and the error that
    /// caused it. Returns the final outcome and the number of attempts made.
    pub async fn run<T, F, Fut, R>(&self, mut op: F, mut on_retry: R) -> (Result<T>, u32)
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        R: FnMut(u32, Duration, &WeaveError),
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return (Ok(value), attempt + 1),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying after transient error"
                    );
                    on_retry(attempt + 1, backoff, &e);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt + 1),
            }
        }
    }
}
