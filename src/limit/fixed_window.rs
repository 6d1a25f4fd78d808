//! Fixed window counter admission.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

use super::{Decision, RateLimiter};

/// Fixed window counter limiter.
///
/// Counts admissions inside windows anchored at multiples of `window_ms`.
/// The counter resets whenever the computed window advances.
///
/// Boundary behavior is intentional and documented: up to `2 * limit`
/// admissions can land within a `window_ms`-length span straddling a window
/// boundary. Callers needing a strict sliding bound should use
/// [`SlidingWindowLog`](super::SlidingWindowLog) or
/// [`SlidingWindowCounter`](super::SlidingWindowCounter).
pub struct FixedWindow {
    window_ms: u64,
    limit: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<WindowState>,
}

struct WindowState {
    window_start_ms: u64,
    count: u64,
}

impl FixedWindow {
    /// Create a fixed window limiter against the system clock.
    ///
    /// Fails fast if `window_ms` is zero.
    pub fn new(window_ms: u64, limit: u64) -> Result<Self> {
        Self::with_clock(window_ms, limit, SystemClock::shared())
    }

    /// Create a fixed window limiter against an injected clock.
    pub fn with_clock(window_ms: u64, limit: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        if window_ms == 0 {
            return Err(FloodgateError::Config(
                "fixed window size must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            window_ms,
            limit,
            clock,
            state: Mutex::new(WindowState {
                window_start_ms: 0,
                count: 0,
            }),
        })
    }

    /// Admission count within the current window.
    pub fn count(&self) -> u64 {
        let state = self.state.lock();
        if self.window_start(self.clock.now_millis()) == state.window_start_ms {
            state.count
        } else {
            0
        }
    }

    /// The configured per-window limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn window_start(&self, now_ms: u64) -> u64 {
        now_ms / self.window_ms * self.window_ms
    }
}

impl RateLimiter for FixedWindow {
    fn allow(&self, cost: u32) -> Decision {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        let window_start = self.window_start(now);
        if window_start != state.window_start_ms {
            state.window_start_ms = window_start;
            state.count = 0;
        }

        let reset_at_ms = window_start + self.window_ms;
        let cost = cost as u64;
        if state.count + cost <= self.limit {
            state.count += cost;
            Decision {
                allowed: true,
                limit: self.limit,
                remaining: self.limit - state.count,
                reset_at_ms,
                retry_after: None,
            }
        } else {
            Decision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_at_ms,
                retry_after: Some(Duration::from_millis(reset_at_ms - now)),
            }
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.window_start_ms = self.window_start(self.clock.now_millis());
        state.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_limit_within_one_window() {
        let clock = ManualClock::shared(0);
        let window = FixedWindow::with_clock(1000, 5, clock.clone()).unwrap();

        for _ in 0..5 {
            assert!(window.allow(1).allowed);
        }
        let decision = window.allow(1);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_millis(1000)));

        // A new window restores the full budget.
        clock.advance(Duration::from_millis(1100));
        let decision = window.allow(1);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn test_boundary_burst_is_intentional() {
        let clock = ManualClock::shared(0);
        let window = FixedWindow::with_clock(1000, 5, clock.clone()).unwrap();

        // 5 admissions at t=999 and 5 more at t=1001: both bursts succeed,
        // the documented consequence of window anchoring.
        clock.set(999);
        for _ in 0..5 {
            assert!(window.allow(1).allowed);
        }
        clock.set(1001);
        for _ in 0..5 {
            assert!(window.allow(1).allowed);
        }
        assert!(!window.allow(1).allowed);
    }

    #[test]
    fn test_retry_after_points_at_next_window() {
        let clock = ManualClock::shared(0);
        let window = FixedWindow::with_clock(1000, 1, clock.clone()).unwrap();

        clock.set(400);
        assert!(window.allow(1).allowed);
        let decision = window.allow(1);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_millis(600)));
        assert_eq!(decision.reset_at_ms, 1000);
    }

    #[test]
    fn test_cost_larger_than_remaining() {
        let clock = ManualClock::shared(0);
        let window = FixedWindow::with_clock(1000, 5, clock).unwrap();

        assert!(window.allow(3).allowed);
        assert!(!window.allow(3).allowed);
        assert!(window.allow(2).allowed);
        assert_eq!(window.count(), 5);
    }

    #[test]
    fn test_reset_reanchors_current_window() {
        let clock = ManualClock::shared(0);
        let window = FixedWindow::with_clock(1000, 2, clock.clone()).unwrap();

        clock.set(500);
        window.allow(2);
        assert!(!window.allow(1).allowed);

        window.reset();
        assert_eq!(window.count(), 0);
        assert!(window.allow(2).allowed);
    }

    #[test]
    fn test_zero_window_is_rejected() {
        assert!(FixedWindow::new(0, 5).is_err());
    }
}
