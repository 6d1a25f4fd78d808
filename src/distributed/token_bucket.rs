//! Distributed token bucket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};
use crate::limit::Decision;
use crate::storage::{BucketCheck, Storage};

use super::keys::{bucket_key, DEFAULT_KEY_PREFIX};
use super::{bounded, DistributedRateLimiter, DEFAULT_CHECK_TIMEOUT};

/// Token bucket over shared storage.
///
/// Bucket state (`tokens`, `last_refill`) lives under a single key per
/// identity with no window suffix; refill-then-consume happens in one
/// `refill_and_take` transaction. The TTL is twice the full-refill horizon:
/// a bucket idle that long has refilled completely, so losing the key is
/// indistinguishable from keeping it.
pub struct DistributedTokenBucket<S> {
    store: Arc<S>,
    key_prefix: String,
    capacity: u64,
    refill_per_second: f64,
    check_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: Storage> DistributedTokenBucket<S> {
    /// Create a limiter over `store`.
    ///
    /// Fails fast if `refill_per_second` is not a positive finite number.
    pub fn new(store: Arc<S>, capacity: u64, refill_per_second: f64) -> Result<Self> {
        if !refill_per_second.is_finite() || refill_per_second <= 0.0 {
            return Err(FloodgateError::Config(format!(
                "token bucket refill rate must be positive, got {}",
                refill_per_second
            )));
        }

        Ok(Self {
            store,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            capacity,
            refill_per_second,
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

    /// The configured capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn state_ttl(&self) -> Duration {
        let horizon = self.capacity as f64 / self.refill_per_second;
        Duration::from_secs_f64((2.0 * horizon).max(1.0))
    }
}

#[async_trait]
impl<S: Storage> DistributedRateLimiter for DistributedTokenBucket<S> {
    async fn allow(&self, identity: &str, cost: u32) -> Result<Decision> {
        let now = self.clock.now_millis();
        let key = bucket_key(&self.key_prefix, identity);

        trace!(identity = %identity, key = %key, cost = cost, "Checking distributed token bucket");

        let outcome = bounded(
            self.check_timeout,
            self.store.refill_and_take(BucketCheck {
                key: &key,
                capacity: self.capacity,
                refill_per_second: self.refill_per_second,
                amount: cost as u64,
                now_ms: now,
                ttl: self.state_ttl(),
            }),
        )
        .await?;

        if outcome.admitted {
            let secs_until_full =
                (self.capacity as f64 - outcome.tokens) / self.refill_per_second;
            Ok(Decision {
                allowed: true,
                limit: self.capacity,
                remaining: outcome.tokens.floor() as u64,
                reset_at_ms: now + (secs_until_full * 1000.0) as u64,
                retry_after: None,
            })
        } else {
            debug!(
                identity = %identity,
                tokens = outcome.tokens,
                "Distributed token bucket empty"
            );
            let retry_after = outcome.retry_after.unwrap_or(Duration::ZERO);
            Ok(Decision {
                allowed: false,
                limit: self.capacity,
                remaining: 0,
                reset_at_ms: now + retry_after.as_millis() as u64,
                retry_after: Some(retry_after),
            })
        }
    }

    async fn reset(&self, identity: &str) -> Result<()> {
        let key = bucket_key(&self.key_prefix, identity);
        bounded(self.check_timeout, self.store.delete(&key)).await
    }
}
