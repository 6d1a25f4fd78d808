//! Multi-tier limiter composition.

use crate::error::{FloodgateError, Result};

use super::{Decision, RateLimiter};

/// Enforces several limiters simultaneously (e.g. 10/second and 1000/hour).
///
/// A request is admitted iff every tier admits it. The first rejection
/// short-circuits and is returned verbatim, so its `retry_after` and
/// `remaining` describe the binding constraint. When all tiers admit, the
/// member decision with the smallest `remaining` is returned, again surfacing
/// the tightest tier without the caller inspecting each one.
///
/// Tiers evaluated before a rejecting tier keep their consumed budget; there
/// is no rollback. Ordering tiers tightest-first keeps that inherent
/// over-counting minimal.
pub struct MultiTierLimiter {
    tiers: Vec<Box<dyn RateLimiter>>,
}

impl MultiTierLimiter {
    /// Compose an ordered list of limiters.
    ///
    /// Fails fast on an empty list: a tierless limiter would admit
    /// everything, which is never what a caller configured.
    pub fn new(tiers: Vec<Box<dyn RateLimiter>>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(FloodgateError::Config(
                "multi-tier limiter requires at least one tier".to_string(),
            ));
        }
        Ok(Self { tiers })
    }

    /// Number of composed tiers.
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }
}

impl RateLimiter for MultiTierLimiter {
    fn allow(&self, cost: u32) -> Decision {
        let mut most_restrictive = self.tiers[0].allow(cost);
        if !most_restrictive.allowed {
            return most_restrictive;
        }

        for tier in &self.tiers[1..] {
            let decision = tier.allow(cost);
            if !decision.allowed {
                return decision;
            }
            if decision.remaining < most_restrictive.remaining {
                most_restrictive = decision;
            }
        }
        most_restrictive
    }

    fn release(&self, cost: u32) {
        for tier in &self.tiers {
            tier.release(cost);
        }
    }

    fn reset(&self) {
        for tier in &self.tiers {
            tier.reset();
        }
    }
}
