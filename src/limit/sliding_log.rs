//! Sliding window log admission.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

use super::{Decision, RateLimiter};

/// Sliding window log limiter.
///
/// Keeps the timestamp of every admission inside the trailing window. This is
/// the only algorithm with zero approximation error, at a storage cost
/// proportional to `limit`.
///
/// Timestamps are appended in clock order, so expired entries are always at
/// the front and pruning is an amortized pop from a deque.
pub struct SlidingWindowLog {
    window_ms: u64,
    limit: u64,
    clock: Arc<dyn Clock>,
    entries: Mutex<VecDeque<u64>>,
}

impl SlidingWindowLog {
    /// Create a sliding log limiter against the system clock.
    ///
    /// Fails fast if `window_ms` is zero.
    pub fn new(window_ms: u64, limit: u64) -> Result<Self> {
        Self::with_clock(window_ms, limit, SystemClock::shared())
    }

    /// Create a sliding log limiter against an injected clock.
    pub fn with_clock(window_ms: u64, limit: u64, clock: Arc<dyn Clock>) -> Result<Self> {
        if window_ms == 0 {
            return Err(FloodgateError::Config(
                "sliding log window size must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            window_ms,
            limit,
            clock,
            entries: Mutex::new(VecDeque::new()),
        })
    }

    /// Number of admissions still inside the window, without mutating the log.
    pub fn get_count(&self) -> u64 {
        let cutoff = self.clock.now_millis().checked_sub(self.window_ms);
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|&&t| cutoff.map_or(true, |c| t > c))
            .count() as u64
    }

    /// The configured per-window limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl RateLimiter for SlidingWindowLog {
    fn allow(&self, cost: u32) -> Decision {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        // Nothing can have aged out while `now` is still inside the first
        // window after the epoch.
        if let Some(cutoff) = now.checked_sub(self.window_ms) {
            while entries.front().is_some_and(|&t| t <= cutoff) {
                entries.pop_front();
            }
        }

        let cost = cost as usize;
        if entries.len() + cost <= self.limit as usize {
            for _ in 0..cost {
                entries.push_back(now);
            }
            Decision {
                allowed: true,
                limit: self.limit,
                remaining: self.limit - entries.len() as u64,
                reset_at_ms: entries
                    .front()
                    .map(|&t| t + self.window_ms)
                    .unwrap_or(now + self.window_ms),
                retry_after: None,
            }
        } else {
            // The oldest entry expiring is the earliest the answer can change.
            let retry_after = entries
                .front()
                .map(|&t| Duration::from_millis((t + self.window_ms).saturating_sub(now)))
                .unwrap_or(Duration::ZERO);
            Decision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_at_ms: entries.front().map(|&t| t + self.window_ms).unwrap_or(now),
                retry_after: Some(retry_after),
            }
        }
    }

    fn reset(&self) {
        self.entries.lock().clear();
    }
}
