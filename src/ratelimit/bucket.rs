//! Token bucket implementation.

use std::time::Instant;

/// A continuously refilling token bucket.
///
/// Tokens accrue fractionally at `rate` per second and are capped at
/// `capacity`. The bucket holds no clock of its own; every call is given
/// the instant it should be evaluated at.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Tokens added per second
    rate: f64,
    /// Maximum tokens the bucket can hold
    capacity: f64,
    /// Tokens currently available, possibly fractional
    tokens: f64,
    /// Instant up to which refill has been accounted
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(rate: f64, burst: u32, now: Instant) -> Self {
        let capacity = f64::from(burst);
        Self {
            rate,
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Take one token if available.
    ///
    /// Returns `true` if a token was consumed. A denial consumes nothing.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens that would be available at `now`, without consuming any.
    pub fn available(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity)
    }

    /// Get the refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Get the bucket capacity.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Accrue tokens for the time since the last refill.
    ///
    /// An instant earlier than the last refill adds nothing and leaves the
    /// refill mark where it is.
    fn refill(&mut self, now: Instant) {
        self.tokens = self.available(now);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_bucket_starts_full() {
        let now = Instant::now();
        let bucket = TokenBucket::new(2.0, 5, now);

        assert_eq!(bucket.available(now), 5.0);
        assert_eq!(bucket.capacity(), 5.0);
        assert_eq!(bucket.rate(), 2.0);
    }

    #[test]
    fn test_burst_then_deny() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 5, now);

        for _ in 0..5 {
            assert!(bucket.try_acquire(now));
        }

        // The 6th request should be rejected
        assert!(!bucket.try_acquire(now));
        assert_eq!(bucket.available(now), 0.0);
    }

    #[test]
    fn test_denial_consumes_nothing() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 1, start);

        assert!(bucket.try_acquire(start));
        for _ in 0..10 {
            assert!(!bucket.try_acquire(start));
        }

        // Repeated denials must not push the next token further out
        assert!(bucket.try_acquire(start + Duration::from_millis(500)));
    }

    #[test]
    fn test_fractional_refill_accumulates() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 5, start);
        for _ in 0..5 {
            bucket.try_acquire(start);
        }

        // 250ms at 2/s is half a token: not enough on its own
        let t1 = start + Duration::from_millis(250);
        assert!(!bucket.try_acquire(t1));

        // Another 250ms completes the token
        let t2 = t1 + Duration::from_millis(250);
        assert!(bucket.try_acquire(t2));
        assert!(!bucket.try_acquire(t2));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 5, start);
        assert!(bucket.try_acquire(start));

        let later = start + Duration::from_secs(3600);
        assert_eq!(bucket.available(later), 5.0);

        for _ in 0..5 {
            assert!(bucket.try_acquire(later));
        }
        assert!(!bucket.try_acquire(later));
    }

    #[test]
    fn test_backwards_time_grants_nothing() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut bucket = TokenBucket::new(2.0, 2, start);
        assert!(bucket.try_acquire(start));
        assert!(bucket.try_acquire(start));

        let earlier = start - Duration::from_secs(5);
        assert!(!bucket.try_acquire(earlier));
        assert_eq!(bucket.available(earlier), 0.0);

        // The refill mark stays at `start`, so half a second later is one token
        assert!(bucket.try_acquire(start + Duration::from_millis(500)));
    }
}
