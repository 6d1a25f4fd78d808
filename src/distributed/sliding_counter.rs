//! Distributed sliding window counter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};
use crate::limit::Decision;
use crate::storage::{CounterCheck, Storage};

use super::keys::{window_key, DEFAULT_KEY_PREFIX};
use super::{bounded, DistributedRateLimiter, DEFAULT_CHECK_TIMEOUT};

/// Sliding window counter over shared storage.
///
/// The current and previous windows live under separate keys; one
/// `check_and_increment` transaction reads both, weights the previous count
/// by the remaining overlap, and increments the current window on admission.
/// Keys carry a TTL of twice the window, long enough for a key to serve as
/// "previous" for one further window before aging out.
pub struct DistributedSlidingWindowCounter<S> {
    store: Arc<S>,
    key_prefix: String,
    window_ms: u64,
    limit: u64,
    check_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: Storage> DistributedSlidingWindowCounter<S> {
    /// Create a limiter over `store`.
    ///
    /// Fails fast if `window_ms` is zero.
    pub fn new(store: Arc<S>, window_ms: u64, limit: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(FloodgateError::Config(
                "sliding counter window size must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            store,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            window_ms,
            limit,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            clock: SystemClock::shared(),
        })
    }

    /// Override the key prefix (wire compatibility with existing keys).
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Override the storage round-trip bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = timeout;
        self
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The configured per-window limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[async_trait]
impl<S: Storage> DistributedRateLimiter for DistributedSlidingWindowCounter<S> {
    async fn allow(&self, identity: &str, cost: u32) -> Result<Decision> {
        let now = self.clock.now_millis();
        let window_start = now / self.window_ms * self.window_ms;
        let key = window_key(&self.key_prefix, identity, window_start);
        // No previous window exists before the first one after the epoch.
        let previous_key = (window_start >= self.window_ms)
            .then(|| window_key(&self.key_prefix, identity, window_start - self.window_ms));

        trace!(identity = %identity, key = %key, cost = cost, "Checking distributed sliding counter");

        let outcome = bounded(
            self.check_timeout,
            self.store.check_and_increment(CounterCheck {
                key: &key,
                previous_key: previous_key.as_deref(),
                limit: self.limit,
                amount: cost as u64,
                now_ms: now,
                window_ms: self.window_ms,
                ttl: Duration::from_millis(2 * self.window_ms),
            }),
        )
        .await?;

        let reset_at_ms = window_start + self.window_ms;
        if outcome.admitted {
            let remaining = (self.limit as f64 - outcome.estimate - cost as f64).max(0.0);
            Ok(Decision {
                allowed: true,
                limit: self.limit,
                remaining: remaining.floor() as u64,
                reset_at_ms,
                retry_after: None,
            })
        } else {
            debug!(
                identity = %identity,
                estimate = outcome.estimate,
                limit = self.limit,
                "Distributed sliding counter limit exceeded"
            );
            Ok(Decision {
                allowed: false,
                limit: self.limit,
                remaining: 0,
                reset_at_ms,
                retry_after: Some(Duration::from_millis(reset_at_ms.saturating_sub(now))),
            })
        }
    }

    async fn reset(&self, identity: &str) -> Result<()> {
        let now = self.clock.now_millis();
        let window_start = now / self.window_ms * self.window_ms;
        let key = window_key(&self.key_prefix, identity, window_start);
        let previous_key = (window_start >= self.window_ms)
            .then(|| window_key(&self.key_prefix, identity, window_start - self.window_ms));

        bounded(self.check_timeout, async {
            self.store.delete(&key).await?;
            if let Some(previous_key) = previous_key {
                self.store.delete(&previous_key).await?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    fn limiter(
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    ) -> DistributedSlidingWindowCounter<MemoryStore> {
        DistributedSlidingWindowCounter::new(store, 1000, 10)
            .unwrap()
            .with_clock(clock)
    }

    #[tokio::test]
    async fn test_previous_window_weighs_into_estimate() {
        let clock = ManualClock::shared(0);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = limiter(store, clock.clone());

        for _ in 0..10 {
            assert!(limiter.allow("user:1", 1).await.unwrap().allowed);
        }
        assert!(!limiter.allow("user:1", 1).await.unwrap().allowed);

        // Halfway into the next window: 10 * 0.5 leaves room for 5.
        clock.set(1500);
        for _ in 0..5 {
            assert!(limiter.allow("user:1", 1).await.unwrap().allowed);
        }
        let decision = limiter.allow("user:1", 1).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, Some(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn test_remaining_tracks_estimate() {
        let clock = ManualClock::shared(0);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = limiter(store, clock.clone());

        for _ in 0..10 {
            limiter.allow("user:1", 1).await.unwrap();
        }

        clock.set(1500);
        let decision = limiter.allow("user:1", 1).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_budget_shared_across_processes() {
        let clock = ManualClock::shared(0);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let a = limiter(store.clone(), clock.clone());
        let b = limiter(store, clock);

        for _ in 0..5 {
            assert!(a.allow("user:1", 1).await.unwrap().allowed);
            assert!(b.allow("user:1", 1).await.unwrap().allowed);
        }
        assert!(!a.allow("user:1", 1).await.unwrap().allowed);
        assert!(!b.allow("user:1", 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_reset_clears_both_windows() {
        let clock = ManualClock::shared(0);
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = limiter(store, clock.clone());

        for _ in 0..10 {
            limiter.allow("user:1", 1).await.unwrap();
        }
        clock.set(1500);
        limiter.reset("user:1").await.unwrap();

        // Both the current and the weighted previous count are gone.
        for _ in 0..10 {
            assert!(limiter.allow("user:1", 1).await.unwrap().allowed);
        }
    }
}
