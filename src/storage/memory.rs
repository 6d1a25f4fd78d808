//! In-process storage backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;

use super::{BucketCheck, BucketOutcome, CounterCheck, CounterOutcome, Storage};

/// Storage backend over a process-local map.
///
/// One mutex guards all state, which is what makes the admission
/// transactions indivisible here; the hold time is a handful of map
/// operations and no await point ever occurs under the lock. Expired keys
/// are dropped lazily on access against the injected clock, mirroring how a
/// networked store would expire them server-side.
///
/// Suitable for single-process composition and as the reference
/// implementation the storage tests are written against.
#[derive(Clone)]
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, CounterEntry>,
    buckets: HashMap<String, BucketEntry>,
}

struct CounterEntry {
    value: i64,
    expires_at_ms: Option<u64>,
}

struct BucketEntry {
    tokens: f64,
    last_refill_ms: u64,
    expires_at_ms: u64,
}

impl MemoryStore {
    /// Create a store against the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared())
    }

    /// Create a store against an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Number of live keys, counting both kinds of state.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        let inner = self.inner.lock();
        let counters = inner
            .counters
            .values()
            .filter(|e| e.expires_at_ms.map_or(true, |at| at > now))
            .count();
        let buckets = inner
            .buckets
            .values()
            .filter(|e| e.expires_at_ms > now)
            .count();
        counters + buckets
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn live_counter(&mut self, key: &str, now_ms: u64) -> Option<&mut CounterEntry> {
        let expired = self
            .counters
            .get(key)
            .is_some_and(|e| e.expires_at_ms.is_some_and(|at| at <= now_ms));
        if expired {
            self.counters.remove(key);
        }
        self.counters.get_mut(key)
    }

    fn counter_value(&mut self, key: &str, now_ms: u64) -> i64 {
        self.live_counter(key, now_ms).map(|e| e.value).unwrap_or(0)
    }
}

fn expiry(now_ms: u64, ttl: Duration) -> u64 {
    now_ms + ttl.as_millis() as u64
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        Ok(inner.live_counter(key, now).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: i64, ttl: Option<Duration>) -> Result<()> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        inner.counters.insert(
            key.to_string(),
            CounterEntry {
                value,
                expires_at_ms: ttl.map(|t| expiry(now, t)),
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        match inner.live_counter(key, now) {
            Some(entry) => {
                entry.value += amount;
                Ok(entry.value)
            }
            None => {
                inner.counters.insert(
                    key.to_string(),
                    CounterEntry {
                        value: amount,
                        expires_at_ms: None,
                    },
                );
                Ok(amount)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.counters.remove(key);
        inner.buckets.remove(key);
        Ok(())
    }

    async fn check_and_increment(&self, check: CounterCheck<'_>) -> Result<CounterOutcome> {
        let mut inner = self.inner.lock();

        let current = inner.counter_value(check.key, check.now_ms).max(0) as u64;
        let estimate = match check.previous_key {
            Some(previous_key) => {
                let previous = inner.counter_value(previous_key, check.now_ms).max(0) as u64;
                let window_start = check.now_ms / check.window_ms * check.window_ms;
                let elapsed = check.now_ms.saturating_sub(window_start) as f64;
                let overlap =
                    ((check.window_ms as f64 - elapsed) / check.window_ms as f64).max(0.0);
                (previous as f64 * overlap).floor() + current as f64
            }
            None => current as f64,
        };

        if estimate + check.amount as f64 <= check.limit as f64 {
            let new_count = current + check.amount;
            inner.counters.insert(
                check.key.to_string(),
                CounterEntry {
                    value: new_count as i64,
                    expires_at_ms: Some(expiry(check.now_ms, check.ttl)),
                },
            );
            Ok(CounterOutcome {
                admitted: true,
                new_count,
                estimate,
            })
        } else {
            Ok(CounterOutcome {
                admitted: false,
                new_count: current,
                estimate,
            })
        }
    }

    async fn refill_and_take(&self, check: BucketCheck<'_>) -> Result<BucketOutcome> {
        let mut inner = self.inner.lock();

        let (mut tokens, last_refill_ms) = match inner.buckets.get(check.key) {
            Some(entry) if entry.expires_at_ms > check.now_ms => {
                (entry.tokens, entry.last_refill_ms)
            }
            _ => (check.capacity as f64, check.now_ms),
        };

        let elapsed = check.now_ms.saturating_sub(last_refill_ms) as f64 / 1000.0;
        tokens = (tokens + elapsed * check.refill_per_second).min(check.capacity as f64);

        let amount = check.amount as f64;
        let (admitted, retry_after) = if tokens >= amount {
            tokens -= amount;
            (true, None)
        } else {
            let wait = (amount - tokens) / check.refill_per_second;
            (false, Some(Duration::from_secs_f64(wait)))
        };

        inner.buckets.insert(
            check.key.to_string(),
            BucketEntry {
                tokens,
                last_refill_ms: check.now_ms,
                expires_at_ms: expiry(check.now_ms, check.ttl),
            },
        );

        Ok(BucketOutcome {
            admitted,
            tokens,
            retry_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn ttl(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let store = MemoryStore::with_clock(ManualClock::shared(0));

        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", 7, None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(7));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_expire_lazily() {
        let clock = ManualClock::shared(0);
        let store = MemoryStore::with_clock(clock.clone());

        store.set("k", 1, Some(ttl(2))).await.unwrap();
        clock.advance(Duration::from_millis(1999));
        assert_eq!(store.get("k").await.unwrap(), Some(1));

        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_increment_creates_when_absent() {
        let store = MemoryStore::with_clock(ManualClock::shared(0));

        assert_eq!(store.increment("k", 3).await.unwrap(), 3);
        assert_eq!(store.increment("k", 2).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_fixed_window_transaction() {
        let store = MemoryStore::with_clock(ManualClock::shared(0));
        let check = |amount| CounterCheck {
            key: "fw",
            previous_key: None,
            limit: 3,
            amount,
            now_ms: 100,
            window_ms: 1000,
            ttl: ttl(2),
        };

        let outcome = store.check_and_increment(check(2)).await.unwrap();
        assert!(outcome.admitted);
        assert_eq!(outcome.new_count, 2);

        // 2 + 2 > 3: rejected and the counter untouched.
        let outcome = store.check_and_increment(check(2)).await.unwrap();
        assert!(!outcome.admitted);
        assert_eq!(outcome.new_count, 2);

        let outcome = store.check_and_increment(check(1)).await.unwrap();
        assert!(outcome.admitted);
        assert_eq!(outcome.new_count, 3);
    }

    #[tokio::test]
    async fn test_sliding_transaction_weighs_previous_window() {
        let clock = ManualClock::shared(0);
        let store = MemoryStore::with_clock(clock.clone());

        store.set("prev", 10, Some(ttl(10))).await.unwrap();

        // Halfway through the current window the previous 10 count as 5.
        let outcome = store
            .check_and_increment(CounterCheck {
                key: "cur",
                previous_key: Some("prev"),
                limit: 10,
                amount: 1,
                now_ms: 1500,
                window_ms: 1000,
                ttl: ttl(2),
            })
            .await
            .unwrap();
        assert!(outcome.admitted);
        assert_eq!(outcome.estimate, 5.0);
        assert_eq!(outcome.new_count, 1);
    }

    #[tokio::test]
    async fn test_transaction_refreshes_ttl() {
        let clock = ManualClock::shared(0);
        let store = MemoryStore::with_clock(clock.clone());
        let check = |now_ms| CounterCheck {
            key: "fw",
            previous_key: None,
            limit: 10,
            amount: 1,
            now_ms,
            window_ms: 1000,
            ttl: ttl(2),
        };

        store.check_and_increment(check(0)).await.unwrap();
        clock.set(1500);
        store.check_and_increment(check(1500)).await.unwrap();

        // Without the refresh at t=1500 the key would have expired at t=2000.
        clock.set(3000);
        assert_eq!(store.get("fw").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_bucket_transaction_refills_and_rejects() {
        let clock = ManualClock::shared(0);
        let store = MemoryStore::with_clock(clock.clone());
        let check = |amount, now_ms| BucketCheck {
            key: "tb",
            capacity: 4,
            refill_per_second: 2.0,
            amount,
            now_ms,
            ttl: ttl(10),
        };

        // Fresh bucket starts full.
        let outcome = store.refill_and_take(check(4, 0)).await.unwrap();
        assert!(outcome.admitted);
        assert_eq!(outcome.tokens, 0.0);

        let outcome = store.refill_and_take(check(1, 0)).await.unwrap();
        assert!(!outcome.admitted);
        assert_eq!(outcome.retry_after, Some(Duration::from_secs_f64(0.5)));

        // One second refills two tokens.
        let outcome = store.refill_and_take(check(2, 1000)).await.unwrap();
        assert!(outcome.admitted);
    }

    #[tokio::test]
    async fn test_concurrent_transactions_never_overshoot() {
        let store = MemoryStore::with_clock(ManualClock::shared(0));

        let attempts = (0..100).map(|_| {
            let store = store.clone();
            async move {
                store
                    .check_and_increment(CounterCheck {
                        key: "contended",
                        previous_key: None,
                        limit: 10,
                        amount: 1,
                        now_ms: 50,
                        window_ms: 1000,
                        ttl: ttl(2),
                    })
                    .await
                    .unwrap()
            }
        });

        let outcomes = futures::future::join_all(attempts).await;
        let admitted = outcomes.iter().filter(|o| o.admitted).count();
        assert_eq!(admitted, 10);
        assert_eq!(store.get("contended").await.unwrap(), Some(10));
    }
}
