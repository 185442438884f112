use std::time::Instant;

use dashmap::DashMap;

/// A continuously refilling token bucket.
///
/// Capacity equals the configured requests-per-minute; refill runs at
/// capacity/60 tokens per second. The bucket starts full, so a burst of up
/// to `capacity` requests is admitted before refill pacing kicks in.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, now: Instant) -> bool {
        // Config changes apply on the next request: adjust capacity in place
        // without granting a fresh burst.
        if (capacity - self.capacity).abs() > f64::EPSILON {
            self.capacity = capacity;
            self.tokens = self.tokens.min(capacity);
        }

        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.capacity / 60.0).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-proxy token buckets. Purely in-memory: buckets reset to full
/// capacity when a proxy (or the process) restarts.
pub struct RateLimiter {
    buckets: DashMap<i64, TokenBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Try to consume one token from the proxy's bucket.
    pub fn try_acquire(&self, proxy_id: i64, requests_per_minute: u32) -> bool {
        self.try_acquire_at(proxy_id, requests_per_minute, Instant::now())
    }

    pub fn try_acquire_at(&self, proxy_id: i64, requests_per_minute: u32, now: Instant) -> bool {
        let capacity = f64::from(requests_per_minute.max(1));
        let mut bucket = self
            .buckets
            .entry(proxy_id)
            .or_insert_with(|| TokenBucket::new(capacity, now));
        bucket.try_acquire(capacity, now)
    }

    /// Drop the proxy's bucket; the next request gets a full one.
    pub fn reset(&self, proxy_id: i64) {
        self.buckets.remove(&proxy_id);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn admits_initial_burst_up_to_capacity() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.try_acquire_at(1, 5, now));
        }
        assert!(!limiter.try_acquire_at(1, 5, now));
    }

    #[test]
    fn refills_continuously() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();
        // Drain a 60 rpm bucket (1 token/sec refill).
        for _ in 0..60 {
            assert!(limiter.try_acquire_at(1, 60, t0));
        }
        assert!(!limiter.try_acquire_at(1, 60, t0));

        // Half a second later: still short of a whole token.
        assert!(!limiter.try_acquire_at(1, 60, t0 + Duration::from_millis(500)));
        // After one full second a single token is back.
        assert!(limiter.try_acquire_at(1, 60, t0 + Duration::from_millis(1600)));
        assert!(!limiter.try_acquire_at(1, 60, t0 + Duration::from_millis(1600)));
    }

    #[test]
    fn refill_caps_at_capacity() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();
        assert!(limiter.try_acquire_at(1, 2, t0));

        // A long idle period must not bank more than `capacity` tokens.
        let later = t0 + Duration::from_secs(3600);
        assert!(limiter.try_acquire_at(1, 2, later));
        assert!(limiter.try_acquire_at(1, 2, later));
        assert!(!limiter.try_acquire_at(1, 2, later));
    }

    #[test]
    fn buckets_are_per_proxy() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(limiter.try_acquire_at(1, 1, now));
        assert!(!limiter.try_acquire_at(1, 1, now));
        assert!(limiter.try_acquire_at(2, 1, now));
    }

    #[test]
    fn capacity_change_applies_without_fresh_burst() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..5 {
            limiter.try_acquire_at(1, 5, now);
        }
        assert!(!limiter.try_acquire_at(1, 5, now));
        // Raising the limit does not refund already-spent tokens.
        assert!(!limiter.try_acquire_at(1, 100, now));
    }

    #[test]
    fn reset_restores_full_bucket() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(limiter.try_acquire_at(1, 1, now));
        assert!(!limiter.try_acquire_at(1, 1, now));
        limiter.reset(1);
        assert!(limiter.try_acquire_at(1, 1, now));
    }
}
