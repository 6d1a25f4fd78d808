//! Sliding window counter admission.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

use super::{Decision, RateLimiter};

/// Sliding window counter limiter.
///
/// Hybrid of the fixed window and the log: two fixed-window counters,
/// `current` and `previous`, with the previous count weighted by how much of
/// the previous window still overlaps the trailing `window_ms`:
///
/// ```text
/// estimate(now) = previous.count * overlap + current.count
/// overlap       = max(0, (window_ms - (now - current.start)) / window_ms)
/// ```
///
/// O(1) state with bounded error: exact under uniform traffic, pessimistic
/// only when traffic clusters at window boundaries. The practical default for
/// production limiting.
pub struct SlidingWindowCounter {
    window_ms: u64,
    limit: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<CounterState>,
}

#[derive(Clone, Copy)]
struct WindowCount {
    start_ms: u64,
    count: u64,
}

struct CounterState {
    current: WindowCount,
    previous: WindowCount,
}

impl SlidingWindowCounter {
    /// Create a sliding counter limiter against the system clock.
    ///
    /// Fails fast if `window_ms` is zero.
    pub fn new(window_ms: u64, limit: u64) -> Result<Self> {
        Self::with_clock(window_ms, limit, SystemClock::shared())
    }

    /// Create a sliding counter limiter against an injected clock.
    pub fn with_clock(window_ms: u64, limit: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        if window_ms == 0 {
            return Err(FloodgateError::Config(
                "sliding counter window size must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            window_ms,
            limit,
            clock,
            state: Mutex::new(CounterState {
                current: WindowCount { start_ms: 0, count: 0 },
                previous: WindowCount { start_ms: 0, count: 0 },
            }),
        })
    }

    /// Weighted estimate of admissions in the trailing window, without
    /// consuming anything.
    pub fn estimated_count(&self) -> f64 {
        let now = self.clock.now_millis();
        let state = self.state.lock();
        let (current, previous) = self.rolled(&state, now);
        self.estimate(now, &current, &previous)
    }

    /// The configured per-window limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn window_start(&self, now_ms: u64) -> u64 {
        now_ms / self.window_ms * self.window_ms
    }

    /// Window pair as of `now_ms`, shifting if the window has advanced.
    ///
    /// Invariant: `previous` always describes the window immediately before
    /// `current`. A count older than that is stale and carries zero weight,
    /// so it is discarded rather than shifted.
    fn rolled(&self, state: &CounterState, now_ms: u64) -> (WindowCount, WindowCount) {
        let window_start = self.window_start(now_ms);
        if window_start == state.current.start_ms {
            return (state.current, state.previous);
        }

        let previous = if state.current.start_ms + self.window_ms == window_start {
            state.current
        } else {
            WindowCount {
                start_ms: window_start.saturating_sub(self.window_ms),
                count: 0,
            }
        };
        (
            WindowCount {
                start_ms: window_start,
                count: 0,
            },
            previous,
        )
    }

    fn estimate(&self, now_ms: u64, current: &WindowCount, previous: &WindowCount) -> f64 {
        let elapsed = now_ms.saturating_sub(current.start_ms) as f64;
        let overlap = ((self.window_ms as f64 - elapsed) / self.window_ms as f64).max(0.0);
        previous.count as f64 * overlap + current.count as f64
    }
}

impl RateLimiter for SlidingWindowCounter {
    fn allow(&self, cost: u32) -> Decision {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        let (current, previous) = self.rolled(&state, now);
        state.current = current;
        state.previous = previous;

        let estimated = self.estimate(now, &state.current, &state.previous);
        let reset_at_ms = state.current.start_ms + self.window_ms;

        if estimated + cost as f64 <= self.limit as f64 {
            state.current.count += cost as u64;
            let remaining = (self.limit as f64 - estimated - cost as f64).max(0.0);
            Decision {
                allowed: true,
                limit: self.limit,
                remaining: remaining.floor() as u64,
                reset_at_ms,
                retry_after: None,
            }
        } else {
            Decision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_at_ms,
                retry_after: Some(Duration::from_millis(reset_at_ms.saturating_sub(now))),
            }
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        let window_start = self.window_start(self.clock.now_millis());
        state.current = WindowCount {
            start_ms: window_start,
            count: 0,
        };
        state.previous = WindowCount {
            start_ms: window_start.saturating_sub(self.window_ms),
            count: 0,
        };
    }
}
