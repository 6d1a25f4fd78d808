//! Leaky bucket admission.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

use super::{Decision, RateLimiter};

/// Leaky bucket limiter.
///
/// Models a FIFO queue of admitted slots draining at `leak_per_second`.
/// Unlike the token bucket, output is rate-capped even under burst input:
/// work is never admitted faster than the leak rate once the buffer is full,
/// only buffered up to `capacity` pending units.
///
/// Only the queue length matters for admission, so the queue is stored as a
/// count rather than a deque of timestamps.
pub struct LeakyBucket {
    capacity: u64,
    leak_per_second: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

struct QueueState {
    queued: u64,
    last_leak_ms: u64,
}

impl LeakyBucket {
    /// Create a leaky bucket against the system clock.
    ///
    /// Fails fast if `leak_per_second` is not a positive finite number.
    pub fn new(capacity: u64, leak_per_second: f64) -> Result<Self> {
        Self::with_clock(capacity, leak_per_second, SystemClock::shared())
    }

    /// Create a leaky bucket against an injected clock.
    pub fn with_clock(capacity: u64, leak_per_second: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if !leak_per_second.is_finite() || leak_per_second <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "leaky bucket leak rate must be positive, got {}",
                leak_per_second
            )));
        }

        let now = clock.now_millis();
        Ok(Self {
            capacity,
            leak_per_second,
            clock,
            state: Mutex::new(QueueState {
                queued: 0,
                last_leak_ms: now,
            }),
        })
    }

    /// Queue length after draining, without enqueueing anything.
    pub fn queue_len(&self) -> u64 {
        let state = self.state.lock();
        let (queued, _) = self.drained(&state, self.clock.now_millis());
        queued
    }

    /// The configured capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Compute the post-drain queue length and the new leak anchor.
    ///
    /// The anchor advances only by the time accounted for by whole drained
    /// slots, so callers polling faster than the leak interval still make
    /// progress; once the queue empties it snaps to `now` so idle time does
    /// not bank future drains.
    fn drained(&self, state: &QueueState, now_ms: u64) -> (u64, u64) {
        let elapsed = now_ms.saturating_sub(state.last_leak_ms) as f64 / 1000.0;
        let slots = (elapsed * self.leak_per_second).floor() as u64;

        if slots >= state.queued {
            (0, now_ms)
        } else {
            let consumed_ms = (slots as f64 / self.leak_per_second * 1000.0) as u64;
            (state.queued - slots, state.last_leak_ms + consumed_ms)
        }
    }
}

impl RateLimiter for LeakyBucket {
    fn allow(&self, cost: u32) -> Decision {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        let (queued, anchor) = self.drained(&state, now);
        state.queued = queued;
        state.last_leak_ms = anchor;

        let cost = cost as u64;
        if state.queued + cost <= self.capacity {
            state.queued += cost;
            let secs_until_empty = state.queued as f64 / self.leak_per_second;
            Decision {
                allowed: true,
                limit: self.capacity,
                remaining: self.capacity - state.queued,
                reset_at_ms: now + (secs_until_empty * 1000.0) as u64,
                retry_after: None,
            }
        } else {
            let overflow = state.queued + cost - self.capacity;
            let retry_after = Duration::from_secs_f64(overflow as f64 / self.leak_per_second);
            Decision {
                allowed: false,
                limit: self.capacity,
                remaining: 0,
                reset_at_ms: now + retry_after.as_millis() as u64,
                retry_after: Some(retry_after),
            }
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.queued = 0;
        state.last_leak_ms = self.clock.now_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_buffers_up_to_capacity() {
        let clock = ManualClock::shared(0);
        let bucket = LeakyBucket::with_clock(3, 1.0, clock).unwrap();

        assert!(bucket.allow(1).allowed);
        assert!(bucket.allow(1).allowed);
        assert!(bucket.allow(1).allowed);
        assert_eq!(bucket.queue_len(), 3);

        let decision = bucket.allow(1);
        assert!(!decision.allowed);
        // One slot must drain before one more unit fits.
        assert_eq!(decision.retry_after, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_output_is_rate_capped() {
        let clock = ManualClock::shared(0);
        let bucket = LeakyBucket::with_clock(2, 1.0, clock.clone()).unwrap();

        // Fill the buffer, then hammer it: only one admission per leaked slot.
        assert!(bucket.allow(2).allowed);
        assert!(!bucket.allow(1).allowed);

        clock.advance(Duration::from_secs(1));
        assert!(bucket.allow(1).allowed);
        assert!(!bucket.allow(1).allowed);

        clock.advance(Duration::from_secs(1));
        assert!(bucket.allow(1).allowed);
        assert!(!bucket.allow(1).allowed);
    }

    #[test]
    fn test_sub_interval_polling_still_drains() {
        let clock = ManualClock::shared(0);
        let bucket = LeakyBucket::with_clock(1, 1.0, clock.clone()).unwrap();

        assert!(bucket.allow(1).allowed);

        // Poll every 250ms at a 1/sec leak rate: the fourth poll lands a full
        // second after the enqueue and must see the slot drained.
        for _ in 0..3 {
            clock.advance(Duration::from_millis(250));
            assert!(!bucket.allow(1).allowed);
        }
        clock.advance(Duration::from_millis(250));
        assert!(bucket.allow(1).allowed);
    }

    #[test]
    fn test_queue_never_exceeds_capacity() {
        let clock = ManualClock::shared(0);
        let bucket = LeakyBucket::with_clock(4, 2.0, clock.clone()).unwrap();

        for _ in 0..20 {
            bucket.allow(3);
            clock.advance(Duration::from_millis(100));
            assert!(bucket.queue_len() <= 4);
        }
    }

    #[test]
    fn test_idle_time_does_not_bank_drains() {
        let clock = ManualClock::shared(0);
        let bucket = LeakyBucket::with_clock(2, 1.0, clock.clone()).unwrap();

        // Long idle with an empty queue, then fill: draining starts from the
        // fill instant, not from the stale anchor.
        clock.advance(Duration::from_secs(60));
        assert!(bucket.allow(2).allowed);
        assert!(!bucket.allow(1).allowed);
        assert_eq!(bucket.queue_len(), 2);
    }

    #[test]
    fn test_reset_empties_queue() {
        let clock = ManualClock::shared(0);
        let bucket = LeakyBucket::with_clock(2, 1.0, clock).unwrap();

        bucket.allow(2);
        bucket.reset();
        assert_eq!(bucket.queue_len(), 0);
        assert!(bucket.allow(2).allowed);
    }

    #[test]
    fn test_invalid_leak_rate_is_rejected() {
        assert!(LeakyBucket::new(10, 0.0).is_err());
        assert!(LeakyBucket::new(10, -2.0).is_err());
        assert!(LeakyBucket::new(10, f64::INFINITY).is_err());
    }
}
