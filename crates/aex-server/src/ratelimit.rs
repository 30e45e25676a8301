//! Token-bucket rate limiting per remote address.
//!
//! Redesigned from the sliding-window, single-global `RateLimiter` this
//! workspace's daemon tooling otherwise uses: a token bucket keyed by
//! remote address, refilling continuously rather than expiring a
//! timestamp deque, so one noisy client cannot exhaust another's budget.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Allows `capacity` requests per `window`, refilling continuously.
pub struct RateLimiter {
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(capacity: u32, window: Duration) -> Self {
        let refill_per_sec = capacity as f64 / window.as_secs_f64().max(f64::EPSILON);
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity: capacity as f64,
            refill_per_sec,
        }
    }

    /// Consumes one token for `addr`. Returns `Ok(())` if a token was
    /// available, or `Err(retry_after_secs)` if the bucket is empty.
    pub fn check(&self, addr: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let bucket = buckets.entry(addr).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after = (deficit / self.refill_per_sec).ceil().max(1.0) as u64;
            Err(retry_after)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn allows_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check(addr()).is_ok());
        assert!(limiter.check(addr()).is_ok());
        assert!(limiter.check(addr()).is_ok());
        assert!(limiter.check(addr()).is_err());
    }

    #[test]
    fn different_addresses_have_independent_buckets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1".parse().unwrap()).is_ok());
        assert!(limiter.check("10.0.0.2".parse().unwrap()).is_ok());
    }

    #[test]
    fn refills_over_time() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.check(addr()).is_ok());
        assert!(limiter.check(addr()).is_err());
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check(addr()).is_ok());
    }
}
