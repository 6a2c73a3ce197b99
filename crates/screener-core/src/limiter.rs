//! Sliding-window rate limiter shared by the source adapters. Each source
//! keeps one instance, so symbols collected in parallel share a single
//! budget per source.

use crate::ScreenerError;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// At most `max_requests` per `window`. `acquire` blocks until the window
/// reopens, bounded by an optional caller-supplied deadline.
#[derive(Clone)]
pub struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    /// Convenience constructor for per-hour budgets.
    pub fn per_hour(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(3600))
    }

    /// Convenience constructor for per-minute budgets.
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Claim one request slot, sleeping until the window reopens. Returns
    /// `RateLimited` if the wait would run past `deadline`.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<(), ScreenerError> {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return Ok(());
            }

            let wait_until = ts
                .front()
                .copied()
                .map(|front| front + self.window)
                .unwrap_or(now);
            drop(ts);

            if let Some(limit) = deadline {
                if wait_until > limit {
                    return Err(ScreenerError::RateLimited(format!(
                        "window reopens in {:.1}s, past the deadline",
                        wait_until.duration_since(now).as_secs_f64()
                    )));
                }
            }

            let sleep_for = wait_until.duration_since(now) + Duration::from_millis(20);
            tracing::debug!("rate limiter: waiting {:.2}s for a slot", sleep_for.as_secs_f64());
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_paces_requests() {
        // 2 requests per second: 5 acquisitions must span >= 2 seconds.
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(None).await.unwrap();
        }
        assert!(
            start.elapsed() >= Duration::from_secs(2),
            "5 requests at 2/s finished in {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn deadline_bounds_the_wait() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.acquire(None).await.unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = limiter.acquire(Some(deadline)).await.unwrap_err();
        assert!(matches!(err, ScreenerError::RateLimited(_)));
    }

    #[tokio::test]
    async fn under_budget_requests_pass_immediately() {
        let limiter = RateLimiter::per_minute(10);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(None).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
