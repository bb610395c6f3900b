// =============================================================================
// Retry Policy — exponential back-off wrapper for transient upstream faults
// =============================================================================
//
// Wraps any fallible async operation so a single network hiccup does not
// abort a scan mid-run. Only transient faults (connect/reset/timeout/5xx) are
// retried; 4xx responses and validation failures surface immediately.
// =============================================================================

use std::future::Future;

use tokio::time::Duration;
use tracing::{error, warn};

use crate::errors::ProviderError;

/// Retry parameters for one class of upstream calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retry attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff_factor,
        }
    }

    /// Standard policy for provider GETs: 2 retries, 1s base, doubling.
    pub fn api() -> Self {
        Self::new(2, Duration::from_secs(1), 2.0)
    }

    /// Run `op`, retrying on retryable errors with exponential back-off.
    ///
    /// `op` is called once per attempt and must produce a fresh future each
    /// time. After exhaustion the last captured error is surfaced.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut delay = self.base_delay;
        let mut last_err: Option<ProviderError> = None;

        for attempt in 0..=self.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    if attempt < self.max_retries {
                        warn!(
                            label,
                            attempt = attempt + 1,
                            total = self.max_retries + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transient failure — retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay = delay.mul_f64(self.backoff_factor);
                    } else {
                        error!(
                            label,
                            attempts = self.max_retries + 1,
                            error = %err,
                            "retries exhausted"
                        );
                    }
                    last_err = Some(err);
                }
                // 4xx, validation, forbidden — do not retry.
                Err(err) => return Err(err),
            }
        }

        Err(last_err.expect("loop ran at least once"))
    }
}
