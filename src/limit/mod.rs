//! Local (in-process) admission algorithms.
//!
//! Each algorithm is an independent state machine behind the shared
//! [`RateLimiter`] contract. There is no common base type: shared behavior is
//! limited to the trait surface, and the clock is injected per instance.
//!
//! All state mutation happens inside a critical section scoped to one limiter
//! instance. Distinct keys (distinct instances) never contend. Nothing blocks
//! or suspends: refill, leak, and window rollover are computed lazily from the
//! clock reading at call time, so an idle limiter consumes no CPU.

use std::time::Duration;

pub mod concurrent;
pub mod fixed_window;
pub mod leaky_bucket;
pub mod multi_tier;
pub mod registry;
pub mod rules;
pub mod sliding_counter;
pub mod sliding_log;
pub mod token_bucket;

pub use concurrent::{ConcurrencyGuard, ConcurrentRequests};
pub use fixed_window::FixedWindow;
pub use leaky_bucket::LeakyBucket;
pub use multi_tier::MultiTierLimiter;
pub use registry::LimiterRegistry;
pub use rules::{IdentityRules, RuleSet, TierRule};
pub use sliding_counter::SlidingWindowCounter;
pub use sliding_log::SlidingWindowLog;
pub use token_bucket::TokenBucket;

/// The outcome of an admission check.
///
/// Every `allow` call produces a `Decision`, including rejects; a local
/// limiter never errors during normal operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the request may proceed now.
    pub allowed: bool,
    /// The configured limit of the deciding tier.
    pub limit: u64,
    /// Budget left after this call. Floored for fractional algorithms.
    pub remaining: u64,
    /// Earliest epoch-millisecond instant at which a rejected call could
    /// succeed (or, on admit, when the budget is fully restored). Zero for
    /// algorithms where the notion does not apply.
    pub reset_at_ms: u64,
    /// How long to wait before retrying. Present iff the request was rejected
    /// and the algorithm can compute a meaningful wait.
    pub retry_after: Option<Duration>,
}

impl Decision {
    /// Shorthand for `self.allowed`.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Common contract implemented by every local admission algorithm.
pub trait RateLimiter: Send + Sync {
    /// Decide whether `cost` units of work may proceed now, consuming budget
    /// if so.
    fn allow(&self, cost: u32) -> Decision;

    /// Return `cost` units of budget.
    ///
    /// Only meaningful for the concurrent-request limiter; the default is a
    /// no-op for time-based algorithms, whose budget returns with time.
    fn release(&self, _cost: u32) {}

    /// Clear all state, restoring the initial/full-capacity condition.
    fn reset(&self);
}
