//! Token-bucket rate limiter.
//!
//! One bucket per rail, owned by the [`GuardedGateway`](super::guard)
//! wrapping that rail's client. Acquisition is non-blocking: an empty
//! bucket fails fast, which degrades on the read path and surfaces as
//! `Throttled` on the write path.

use parking_lot::Mutex;
use std::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Non-blocking token bucket. `capacity` bounds bursts; `refill_per_sec`
/// is the sustained rate.
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (diagnostic)
    #[must_use]
    pub fn available(&self) -> f64 {
        let state = self.state.lock();
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        (state.tokens + elapsed * self.refill_per_sec).min(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_burst_up_to_capacity() {
        let bucket = TokenBucket::new(3, 0.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_refill_restores_tokens() {
        let bucket = TokenBucket::new(1, 1000.0);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let bucket = TokenBucket::new(2, 100.0);
        std::thread::sleep(Duration::from_millis(50));
        assert!(bucket.available() <= 2.0);

        // Only two tokens despite the long idle period
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn test_zero_refill_stays_empty() {
        let bucket = TokenBucket::new(1, 0.0);
        assert!(bucket.try_acquire());
        std::thread::sleep(Duration::from_millis(5));
        assert!(!bucket.try_acquire());
    }
}
