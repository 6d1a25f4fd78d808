//! Shared-storage abstraction for distributed limiting.
//!
//! Counter-based algorithms can be re-targeted at a store shared by several
//! processes. The critical requirement is that the read-estimate-then-write
//! sequence for one key is indivisible with respect to concurrent callers:
//! with separate get/set calls, two processes can both observe spare capacity
//! and both admit, overshooting the limit. The contract therefore exposes the
//! whole admission step as single transactions ([`Storage::check_and_increment`],
//! [`Storage::refill_and_take`]) that implementations must make linearizable
//! per key. No operation ever spans more than the keys named in its request.
//!
//! The in-process [`MemoryStore`] satisfies the contract with one mutex;
//! networked implementations (a Redis script, a compare-and-swap loop against
//! any transactional KV store) live outside this crate.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;

pub use memory::MemoryStore;

/// Inputs to the indivisible window-counter transaction.
#[derive(Debug, Clone)]
pub struct CounterCheck<'a> {
    /// Counter key for the current window.
    pub key: &'a str,
    /// Previous-window key, present for the sliding-counter estimate.
    pub previous_key: Option<&'a str>,
    /// Admission ceiling for the window.
    pub limit: u64,
    /// Units this request consumes.
    pub amount: u64,
    /// Caller's clock reading, epoch milliseconds.
    pub now_ms: u64,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Expiry refreshed on every written key.
    pub ttl: Duration,
}

/// Result of a window-counter transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterOutcome {
    /// Whether the request was admitted (and the counter incremented).
    pub admitted: bool,
    /// Count stored under the current-window key after the transaction.
    pub new_count: u64,
    /// The in-window estimate the admission check was made against.
    pub estimate: f64,
}

/// Inputs to the indivisible token-bucket transaction.
#[derive(Debug, Clone)]
pub struct BucketCheck<'a> {
    /// Bucket state key.
    pub key: &'a str,
    /// Maximum token count.
    pub capacity: u64,
    /// Tokens restored per second.
    pub refill_per_second: f64,
    /// Tokens this request consumes.
    pub amount: u64,
    /// Caller's clock reading, epoch milliseconds.
    pub now_ms: u64,
    /// Expiry refreshed on the written key.
    pub ttl: Duration,
}

/// Result of a token-bucket transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketOutcome {
    /// Whether the request was admitted (and the tokens consumed).
    pub admitted: bool,
    /// Tokens left in the bucket after the transaction.
    pub tokens: f64,
    /// Wait until `amount` tokens exist, present on rejection.
    pub retry_after: Option<Duration>,
}

/// Key/value store with TTL and atomic admission transactions.
///
/// For a fixed key, concurrent transactions from different processes must be
/// linearizable: some total order exists in which each call sees the
/// cumulative effect of every call ordered before it. The window algorithms
/// lose their admission guarantee without this.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the counter stored at `key`.
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Store `value` at `key`, with an optional expiry.
    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()>;

    /// Add `amount` to the counter at `key`, creating it at `amount` if
    /// absent. Returns the new value.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;

    /// Remove `key`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Indivisible check-then-increment for window counters.
    ///
    /// With no `previous_key` the estimate is the current count (fixed
    /// window); with one, the previous count is weighted by how much of the
    /// previous window still overlaps the trailing window (sliding counter).
    /// The counter is incremented only on admission, and written keys get
    /// their TTL refreshed.
    async fn check_and_increment(&self, check: CounterCheck<'_>) -> Result<CounterOutcome>;

    /// Indivisible refill-then-consume for token buckets.
    ///
    /// Refills from elapsed time against the stored state, consumes `amount`
    /// if available, and persists the new state with a refreshed TTL either
    /// way.
    async fn refill_and_take(&self, check: BucketCheck<'_>) -> Result<BucketOutcome>;
}
