//! Token bucket admission.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

use super::{Decision, RateLimiter};

/// Token bucket limiter.
///
/// Tokens accrue at `refill_per_second` up to `capacity`; each admission
/// consumes `cost` tokens. Bursts up to `capacity` are admitted immediately.
/// Refill is computed lazily from elapsed time at call time, so there is no
/// background timer.
///
/// Tokens are fractional internally; `remaining` reported to callers is
/// floored.
pub struct TokenBucket {
    capacity: u64,
    refill_per_second: f64,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    /// Create a token bucket against the system clock.
    ///
    /// Fails fast if `refill_per_second` is not a positive finite number.
    /// A `capacity` of zero is accepted and rejects every request.
    pub fn new(capacity: u64, refill_per_second: f64) -> Result<Self> {
        Self::with_clock(capacity, refill_per_second, SystemClock::shared())
    }

    /// Create a token bucket against an injected clock.
    pub fn with_clock(
        capacity: u64,
        refill_per_second: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if !refill_per_second.is_finite() || refill_per_second <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "token bucket refill rate must be positive, got {}",
                refill_per_second
            )));
        }

        let now = clock.now_millis();
        Ok(Self {
            capacity,
            refill_per_second,
            clock,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill_ms: now,
            }),
        })
    }

    /// Current token count after refill, without consuming anything.
    pub fn tokens(&self) -> f64 {
        let state = self.state.lock();
        self.refilled(&state, self.clock.now_millis())
    }

    /// The configured capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn refilled(&self, state: &BucketState, now_ms: u64) -> f64 {
        let elapsed = now_ms.saturating_sub(state.last_refill_ms) as f64 / 1000.0;
        (state.tokens + elapsed * self.refill_per_second).min(self.capacity as f64)
    }
}

impl RateLimiter for TokenBucket {
    fn allow(&self, cost: u32) -> Decision {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        state.tokens = self.refilled(&state, now);
        state.last_refill_ms = now;

        let cost = cost as f64;
        if state.tokens >= cost {
            state.tokens -= cost;
            let secs_until_full = (self.capacity as f64 - state.tokens) / self.refill_per_second;
            Decision {
                allowed: true,
                limit: self.capacity,
                remaining: state.tokens.floor() as u64,
                reset_at_ms: now + (secs_until_full * 1000.0) as u64,
                retry_after: None,
            }
        } else {
            let needed = cost - state.tokens;
            let retry_after = Duration::from_secs_f64(needed / self.refill_per_second);
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
        state.tokens = self.capacity as f64;
        state.last_refill_ms = self.clock.now_millis();
    }
}
