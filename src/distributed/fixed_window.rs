//! Distributed fixed window counter.

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

/// Fixed window counter over shared storage.
///
/// Each window gets its own key (`<prefix>:<identity>:<windowStartSeconds>`),
/// so rollover needs no coordination: a new window is simply a key nobody has
/// written yet, and old windows age out through their TTL of twice the window
/// length. The whole admission step is one `check_and_increment` transaction.
pub struct DistributedFixedWindow<S> {
    store: Arc<S>,
    key_prefix: String,
    window_ms: u64,
    limit: u64,
    check_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: Storage> DistributedFixedWindow<S> {
    /// Create a limiter over `store`.
    ///
    /// Fails fast if `window_ms` is zero.
    pub fn new(store: Arc<S>, window_ms: u64, limit: u64) -> Result<Self> {
        if window_ms == 0 {
            return Err(FloodgateError::Config(
                "fixed window size must be non-zero".to_string(),
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
impl<S: Storage> DistributedRateLimiter for DistributedFixedWindow<S> {
    async fn allow(&self, identity: &str, cost: u32) -> Result<Decision> {
        let now = self.clock.now_millis();
        let window_start = now / self.window_ms * self.window_ms;
        let key = window_key(&self.key_prefix, identity, window_start);

        trace!(identity = %identity, key = %key, cost = cost, "Checking distributed fixed window");

        let outcome = bounded(
            self.check_timeout,
            self.store.check_and_increment(CounterCheck {
                key: &key,
                previous_key: None,
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
            Ok(Decision {
                allowed: true,
                limit: self.limit,
                remaining: self.limit.saturating_sub(outcome.new_count),
                reset_at_ms,
                retry_after: None,
            })
        } else {
            debug!(
                identity = %identity,
                count = outcome.new_count,
                limit = self.limit,
                "Distributed fixed window limit exceeded"
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
        // Older windows age out via TTL; only the live one needs deleting.
        bounded(self.check_timeout, self.store.delete(&key)).await
    }
}
