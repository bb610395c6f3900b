// =============================================================================
// Rate Limiter — sliding-window gate shared per upstream provider
// =============================================================================
//
// Each provider gets one limiter instance; clones of the owning Arc share the
// same window. `wait()` blocks the caller until a call may be admitted and
// returns the time slept. Response headers that expose the remote's remaining
// budget can pad the local window so we never overshoot the true ceiling.
//
// The lock is never held across a sleep; the critical section only evicts
// expired timestamps and records admissions.
// =============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// Remote-reported remaining budget at or below this pads the local window.
const REMOTE_PAD_THRESHOLD: i64 = 5;

/// Thread-safe sliding-window rate limiter.
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter admitting `max_calls` per `period`.
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            period,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until a call can be made. Returns total time slept.
    pub async fn wait(&self) -> Duration {
        let start = Instant::now();

        loop {
            let sleep_until = {
                let mut window = self.timestamps.lock();
                let now = Instant::now();
                Self::evict(&mut window, now, self.period);

                if window.len() < self.max_calls {
                    window.push_back(now);
                    return start.elapsed();
                }

                // At capacity: the oldest admission must expire first. A
                // small pad avoids re-waking exactly on the boundary.
                *window.front().expect("window at capacity is non-empty")
                    + self.period
                    + Duration::from_millis(100)
            };

            let waited = start.elapsed();
            if waited > Duration::ZERO {
                debug!(waited_ms = waited.as_millis() as u64, "rate limiter looping");
            }
            tokio::time::sleep_until(sleep_until).await;
        }
    }

    /// Update local state from provider response headers.
    ///
    /// When the remote reports `X-Ratelimit-Available` at or below the pad
    /// threshold, the local window is filled toward the ceiling so the next
    /// callers block instead of tripping a remote 429.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let available = headers
            .get("X-Ratelimit-Available")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok());

        if let Some(available) = available {
            if available <= REMOTE_PAD_THRESHOLD {
                let target = self.max_calls.saturating_sub(available.max(0) as usize);
                let mut window = self.timestamps.lock();
                let now = Instant::now();
                while window.len() < target {
                    window.push_back(now);
                }
                warn!(
                    remote_available = available,
                    local_used = window.len(),
                    "remote rate budget nearly exhausted — padded local window"
                );
            }
        }
    }

    /// How many calls are available right now.
    pub fn remaining(&self) -> usize {
        let mut window = self.timestamps.lock();
        Self::evict(&mut window, Instant::now(), self.period);
        self.max_calls.saturating_sub(window.len())
    }

    fn evict(window: &mut VecDeque<Instant>, now: Instant, period: Duration) {
        while let Some(front) = window.front() {
            if now.duration_since(*front) > period {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_calls", &self.max_calls)
            .field("period", &self.period)
            .field("in_window", &self.timestamps.lock().len())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_capacity_without_waiting() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            let waited = limiter.wait().await;
            assert_eq!(waited, Duration::ZERO);
        }
        assert_eq!(limiter.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_at_capacity_for_at_least_the_period() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.wait().await;
        limiter.wait().await;

        // Third call must wait for the first admission to expire.
        let waited = limiter.wait().await;
        assert!(
            waited >= Duration::from_secs(60),
            "expected >= 60s wait, got {waited:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_after_period() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        limiter.wait().await;
        assert_eq!(limiter.remaining(), 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(limiter.remaining(), 1);
        let waited = limiter.wait().await;
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_release_order() {
        let limiter = std::sync::Arc::new(RateLimiter::new(1, Duration::from_secs(5)));
        limiter.wait().await;

        // Two queued waiters: the first spawned acquires first.
        let order = std::sync::Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for label in ["first", "second"] {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait().await;
                order.lock().push(label);
            }));
            // Let the task reach its sleep before spawning the next.
            tokio::time::advance(Duration::from_millis(1)).await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn header_padding_fills_window() {
        let limiter = RateLimiter::new(50, Duration::from_secs(60));
        limiter.wait().await;
        assert_eq!(limiter.remaining(), 49);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-Ratelimit-Available", "3".parse().unwrap());
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.remaining(), 3);

        // A healthy remote budget leaves local state alone.
        let limiter = RateLimiter::new(50, Duration::from_secs(60));
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-Ratelimit-Available", "40".parse().unwrap());
        limiter.update_from_headers(&headers);
        assert_eq!(limiter.remaining(), 50);
    }
}
