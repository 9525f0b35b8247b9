//! Continuous-refill token bucket, the rate limiter's primitive.

use std::sync::Mutex;
use std::time::Instant;

/// A single token bucket: `capacity` tokens max, refilled continuously at
/// `refill_rate` tokens/second.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_used: Instant,
}

impl TokenBucket {
    /// Creates a bucket starting full (`tokens = capacity`).
    #[must_use]
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        let now = Instant::now();
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
                last_used: now,
            }),
        }
    }

    /// Refills based on elapsed wall time, then consumes one token if
    /// available. Returns `true` if the call is admitted.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
        state.last_used = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count after applying refill for elapsed time, without consuming.
    #[must_use]
    pub fn tokens(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }

    /// Duration since this bucket was last consulted by `allow`/`tokens`.
    #[must_use]
    pub fn idle_for(&self) -> std::time::Duration {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.last_used.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_full() {
        let bucket = TokenBucket::new(5.0, 1.0);
        assert!((bucket.tokens() - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_allow_consumes_one_token() {
        let bucket = TokenBucket::new(2.0, 1.0);
        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let bucket = TokenBucket::new(3.0, 1000.0);
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(bucket.tokens() <= 3.0);
    }

    #[test]
    fn test_refill_over_time_allows_again() {
        let bucket = TokenBucket::new(1.0, 100.0);
        assert!(bucket.allow());
        assert!(!bucket.allow());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(bucket.allow());
    }

    #[test]
    fn test_accepted_calls_bounded_by_rate_and_capacity_p5() {
        // P5: over a window T, accepted Allow() calls from an empty bucket
        // are <= floor(T * rate) + capacity.
        let capacity = 5.0;
        let rate = 50.0; // tokens/sec
        let bucket = TokenBucket::new(capacity, rate);
        // Drain it first.
        while bucket.allow() {}

        let window = std::time::Duration::from_millis(200);
        let start = Instant::now();
        let mut accepted = 0u64;
        while start.elapsed() < window {
            if bucket.allow() {
                accepted += 1;
            }
        }
        let bound = (window.as_secs_f64() * rate).floor() as u64 + capacity as u64;
        assert!(
            accepted <= bound,
            "accepted {accepted} exceeded bound {bound}"
        );
    }
}
