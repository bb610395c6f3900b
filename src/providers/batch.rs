// =============================================================================
// Batch Fetcher — bounded-concurrency fan-out across many tickers
// =============================================================================
//
// Dispatches a per-ticker async operation over a worker pool while a shared
// mutex serializes admission through the inter-request delay (the per-minute
// ceiling). Results accumulate keyed by ticker; per-ticker failures are
// logged and silently excluded so one bad symbol never sinks a batch.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{error, info};

use crate::errors::ProviderError;

/// Completions between progress log lines.
const PROGRESS_EVERY: usize = 10;

/// Concurrent fan-out manager for upstream fetches.
pub struct BatchFetcher {
    max_workers: usize,
    /// Minimum spacing between request admissions.
    delay: Duration,
    last_admission: Arc<Mutex<Option<Instant>>>,
}

impl BatchFetcher {
    /// `rate_limit_per_min = 0` disables the admission delay.
    pub fn new(max_workers: usize, rate_limit_per_min: u32) -> Self {
        let delay = if rate_limit_per_min > 0 {
            Duration::from_secs_f64(60.0 / rate_limit_per_min as f64)
        } else {
            Duration::ZERO
        };
        Self {
            max_workers: max_workers.max(1),
            delay,
            last_admission: Arc::new(Mutex::new(None)),
        }
    }

    /// Serialize one admission through the shared gate.
    async fn admit(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut last = self.last_admission.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Run `op` for every ticker with bounded concurrency.
    ///
    /// `op` returns `Ok(Some(T))` for usable data; `Ok(None)` and `Err` are
    /// excluded from the result map (errors are logged with their ticker).
    pub async fn fetch_map<T, F, Fut>(
        &self,
        tickers: &[String],
        label: &str,
        op: F,
    ) -> HashMap<String, T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Option<T>, ProviderError>>,
    {
        let total = tickers.len();
        if total == 0 {
            return HashMap::new();
        }

        info!(
            label,
            total,
            workers = self.max_workers,
            delay_ms = self.delay.as_millis() as u64,
            "batch fetch starting"
        );
        let started = Instant::now();
        let op = &op;

        let outcomes: Vec<(String, Option<T>)> = stream::iter(tickers.iter().cloned())
            .map(|ticker| async move {
                self.admit().await;
                match op(ticker.clone()).await {
                    Ok(value) => (ticker, value),
                    Err(e) => {
                        error!(label, ticker = %ticker, error = %e, "batch item failed");
                        (ticker, None)
                    }
                }
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let mut results = HashMap::new();
        for (done, (ticker, value)) in outcomes.into_iter().enumerate() {
            if let Some(v) = value {
                results.insert(ticker, v);
            }
            if (done + 1) % PROGRESS_EVERY == 0 {
                info!(label, processed = done + 1, total, "batch progress");
            }
        }

        info!(
            label,
            fetched = results.len(),
            total,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch fetch finished"
        );
        results
    }
}

impl std::fmt::Debug for BatchFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFetcher")
            .field("max_workers", &self.max_workers)
            .field("delay", &self.delay)
            .finish()
    }
}
