//! Distributed limiter variants backed by shared storage.
//!
//! These re-target the counter-based algorithms at a [`Storage`] shared by
//! several processes, so one logical limit is enforced across a fleet. Every
//! admission check is a single atomic storage transaction; see the
//! [`storage`](crate::storage) module docs for why.
//!
//! Unlike their local counterparts these operations suspend (a storage round
//! trip) and can fail independently of the caller. Transport failures and
//! timeouts surface as errors distinct from a reject decision; the caller
//! decides whether to fail open (admit during a storage outage, the usual
//! choice when availability outranks perfect enforcement) or fail closed.
//! The library itself only promises bounded waits and intact local state.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{FloodgateError, Result};
use crate::limit::Decision;

pub mod fixed_window;
pub mod keys;
pub mod multi_tier;
pub mod sliding_counter;
pub mod token_bucket;

pub use fixed_window::DistributedFixedWindow;
pub use keys::DEFAULT_KEY_PREFIX;
pub use multi_tier::DistributedMultiTier;
pub use sliding_counter::DistributedSlidingWindowCounter;
pub use token_bucket::DistributedTokenBucket;

/// Bound on a single storage round trip unless overridden per limiter.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Contract shared by every storage-backed limiter.
///
/// Identity is an explicit argument rather than per-instance state: one
/// limiter value serves every identity, with isolation coming from the key
/// space.
#[async_trait]
pub trait DistributedRateLimiter: Send + Sync {
    /// Decide whether `cost` units may proceed for `identity`, consuming
    /// shared budget if so.
    async fn allow(&self, identity: &str, cost: u32) -> Result<Decision>;

    /// Clear the shared state for `identity`.
    async fn reset(&self, identity: &str) -> Result<()>;
}

/// Run a storage operation under the configured time bound.
pub(crate) async fn bounded<T, F>(timeout: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| FloodgateError::StorageTimeout(timeout))?
}
