//! Concurrent-request admission.

use parking_lot::Mutex;

use super::{Decision, RateLimiter};

/// Concurrent-request limiter.
///
/// Bounds in-flight work rather than a time window: `allow` admits while
/// `active + cost <= max_concurrent`, and every admitted unit must be returned
/// with exactly one `release` on every exit path. Prefer
/// [`try_acquire`](ConcurrentRequests::try_acquire), whose guard releases on
/// drop regardless of how the scope exits.
///
/// Rejections carry no `retry_after`: admission depends on other work
/// finishing, not on time, so callers poll or use their own completion signal.
/// `reset_at_ms` is reported as 0 for the same reason.
pub struct ConcurrentRequests {
    max_concurrent: u64,
    active: Mutex<u64>,
}

impl ConcurrentRequests {
    /// Create a concurrent-request limiter.
    ///
    /// A `max_concurrent` of zero is accepted and rejects every request.
    pub fn new(max_concurrent: u64) -> Self {
        Self {
            max_concurrent,
            active: Mutex::new(0),
        }
    }

    /// Number of units currently admitted and not yet released.
    pub fn active(&self) -> u64 {
        *self.active.lock()
    }

    /// The configured concurrency ceiling.
    pub fn max_concurrent(&self) -> u64 {
        self.max_concurrent
    }

    /// Admit `cost` units and tie their release to the returned guard.
    ///
    /// Returns `None` when the request is rejected.
    pub fn try_acquire(&self, cost: u32) -> Option<ConcurrencyGuard<'_>> {
        if self.allow(cost).allowed {
            Some(ConcurrencyGuard {
                limiter: self,
                cost,
            })
        } else {
            None
        }
    }
}

impl RateLimiter for ConcurrentRequests {
    fn allow(&self, cost: u32) -> Decision {
        let mut active = self.active.lock();
        let cost = cost as u64;

        if *active + cost <= self.max_concurrent {
            *active += cost;
            Decision {
                allowed: true,
                limit: self.max_concurrent,
                remaining: self.max_concurrent - *active,
                reset_at_ms: 0,
                retry_after: None,
            }
        } else {
            Decision {
                allowed: false,
                limit: self.max_concurrent,
                remaining: 0,
                reset_at_ms: 0,
                retry_after: None,
            }
        }
    }

    /// Return `cost` admitted units. Over-release clamps at zero rather than
    /// going negative; strict misuse detection is not this layer's job.
    fn release(&self, cost: u32) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(cost as u64);
    }

    fn reset(&self) {
        *self.active.lock() = 0;
    }
}

/// RAII handle for admitted concurrency units; releases them on drop.
pub struct ConcurrencyGuard<'a> {
    limiter: &'a ConcurrentRequests,
    cost: u32,
}

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        self.limiter.release(self.cost);
    }
}
