//! Token bucket throttle for vendor requests.
//!
//! Tushare enforces per-minute quotas per account; staying under them
//! client-side avoids burning retries on throttled responses.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// A token bucket rate limiter.
///
/// Holds at most one second's worth of requests and refills continuously
/// at `requests_per_minute / 60` tokens per second.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute`.
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let per_minute = f64::from(requests_per_minute.max(1));
        let capacity = (per_minute / 60.0).ceil().max(1.0);

        Self {
            name: name.into(),
            capacity,
            refill_per_sec: per_minute / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available.
    pub fn try_acquire(&self) -> bool {
        self.take().is_none()
    }

    /// Take a token, sleeping until one is available.
    pub async fn acquire(&self) {
        while let Some(wait) = self.take() {
            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limited, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Refill, then either consume a token (`None`) or report how long until
    /// the next one.
    fn take(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            let wait = Duration::from_secs_f64(missing / self.refill_per_sec);
            Some(wait.clamp(Duration::from_millis(10), Duration::from_secs(1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_is_one_second_of_budget() {
        let limiter = RateLimiter::new("tushare", 300);
        let burst = std::iter::from_fn(|| limiter.try_acquire().then_some(())).count();
        assert_eq!(burst, 5);

        let limiter = RateLimiter::new("tushare", 30);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_try_acquire_exhausts() {
        let limiter = RateLimiter::new("tushare", 60);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new("tushare", 6000); // 100 req/sec
        while limiter.try_acquire() {}

        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
