//! Token-bucket limiter shared by every adapter in a process, so concurrent
//! (tenant, provider) runs stay inside the aggregate outbound request budget.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    /// Tokens added per second.
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(capacity: u64, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Limiter allowing `requests_per_minute` with bursts up to the same amount.
    #[must_use]
    pub fn per_minute(requests_per_minute: u64) -> Self {
        Self::new(requests_per_minute, requests_per_minute as f64 / 60.0)
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let missing = 1.0 - bucket.tokens;
                Duration::from_secs_f64(missing / self.refill_per_sec.max(f64::EPSILON))
            };
            tokio::time::sleep(wait.min(Duration::from_secs(1))).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn acquired_within(limiter: &RateLimiter, ms: u64) -> bool {
        tokio::time::timeout(Duration::from_millis(ms), limiter.acquire())
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn burst_up_to_capacity() {
        let limiter = RateLimiter::new(5, 0.0);
        for _ in 0..5 {
            assert!(acquired_within(&limiter, 20).await);
        }
        assert!(!acquired_within(&limiter, 50).await);
    }

    #[tokio::test]
    async fn refills_over_time() {
        let limiter = RateLimiter::new(2, 100.0);
        assert!(acquired_within(&limiter, 20).await);
        assert!(acquired_within(&limiter, 20).await);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(acquired_within(&limiter, 20).await);
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new(1, 50.0);
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn per_minute_rate() {
        let limiter = RateLimiter::per_minute(600);
        assert!((limiter.refill_per_sec - 10.0).abs() < f64::EPSILON);
    }
}
