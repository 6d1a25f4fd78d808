//! Per-identity limiter registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

use super::rules::RuleSet;
use super::{Decision, MultiTierLimiter, RateLimiter};

/// Owns the rule set and a concurrent map of per-identity limiters.
///
/// Limiters are created lazily on first use and live until evicted. Lookups
/// for distinct identities never contend: the map shards internally and each
/// limiter serializes only its own state.
pub struct LimiterRegistry {
    rules: RuleSet,
    clock: Arc<dyn Clock>,
    limiters: DashMap<String, Arc<MultiTierLimiter>>,
}

impl LimiterRegistry {
    /// Create a registry against the system clock.
    ///
    /// The rule set must carry a default tier list; without one an
    /// unconfigured identity would bypass limiting entirely, so its absence
    /// is a configuration error.
    pub fn new(rules: RuleSet) -> Result<Self> {
        Self::with_clock(rules, SystemClock::shared())
    }

    /// Create a registry against an injected clock.
    pub fn with_clock(rules: RuleSet, clock: Arc<dyn Clock>) -> Result<Self> {
        if rules.default.is_none() {
            return Err(FloodgateError::Config(
                "registry rule set requires default tiers".to_string(),
            ));
        }
        rules.validate()?;

        Ok(Self {
            rules,
            clock,
            limiters: DashMap::new(),
        })
    }

    /// Check the rate limit for `identity`, consuming `cost` units if
    /// admitted.
    pub fn check(&self, identity: &str, cost: u32) -> Decision {
        trace!(identity = %identity, cost = cost, "Checking rate limit");

        let decision = self.limiter_for(identity).allow(cost);
        if !decision.allowed {
            debug!(identity = %identity, "Rate limit exceeded");
        }
        decision
    }

    /// Return `cost` units for `identity` (concurrent-request tiers only).
    ///
    /// A release for an identity that was never checked is a no-op; there is
    /// nothing to return budget to.
    pub fn release(&self, identity: &str, cost: u32) {
        if let Some(limiter) = self.limiters.get(identity) {
            limiter.release(cost);
        }
    }

    /// Reset the state for `identity`, restoring full capacity.
    pub fn reset(&self, identity: &str) {
        if let Some(limiter) = self.limiters.get(identity) {
            limiter.reset();
        }
    }

    /// Drop the limiter for `identity`. The next check recreates it fresh.
    pub fn evict(&self, identity: &str) -> bool {
        self.limiters.remove(identity).is_some()
    }

    /// Drop every limiter. Primarily useful for tests.
    pub fn clear(&self) {
        self.limiters.clear();
    }

    /// Number of identities with live limiters.
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Whether no limiter has been created yet.
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    fn limiter_for(&self, identity: &str) -> Arc<MultiTierLimiter> {
        self.limiters
            .entry(identity.to_string())
            .or_insert_with(|| {
                debug!(identity = %identity, "Creating limiter");
                let rules = self
                    .rules
                    .rules_for(identity)
                    .expect("default tiers checked at construction");
                let limiter = rules
                    .build(self.clock.clone())
                    .expect("rules validated at construction");
                Arc::new(limiter)
            })
            .clone()
    }
}
