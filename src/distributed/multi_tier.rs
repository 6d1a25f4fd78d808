//! Multi-tier composition over shared storage.

use async_trait::async_trait;

use crate::error::{FloodgateError, Result};
use crate::limit::Decision;

use super::DistributedRateLimiter;

/// Enforces several distributed limiters for one identity.
///
/// Tiers are checked in declared order with one independent storage
/// transaction each; the composite is NOT atomic across tiers. A rejection
/// stops the walk, so tiers after the rejecting one are never charged.
/// Declare tiers tightest-first: the tier most likely to reject then runs
/// before any looser tier has consumed budget, which keeps charged-then-
/// rejected requests to the unavoidable minimum.
///
/// A transport error from any tier aborts the walk and propagates; the
/// caller's fail-open/fail-closed policy applies to the whole composite.
pub struct DistributedMultiTier {
    tiers: Vec<Box<dyn DistributedRateLimiter>>,
}

impl DistributedMultiTier {
    /// Compose an ordered list of distributed limiters, tightest first.
    ///
    /// Fails fast on an empty list.
    pub fn new(tiers: Vec<Box<dyn DistributedRateLimiter>>) -> Result<Self> {
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

#[async_trait]
impl DistributedRateLimiter for DistributedMultiTier {
    async fn allow(&self, identity: &str, cost: u32) -> Result<Decision> {
        let mut most_restrictive = self.tiers[0].allow(identity, cost).await?;
        if !most_restrictive.allowed {
            return Ok(most_restrictive);
        }

        for tier in &self.tiers[1..] {
            let decision = tier.allow(identity, cost).await?;
            if !decision.allowed {
                return Ok(decision);
            }
            if decision.remaining < most_restrictive.remaining {
                most_restrictive = decision;
            }
        }
        Ok(most_restrictive)
    }

    async fn reset(&self, identity: &str) -> Result<()> {
        for tier in &self.tiers {
            tier.reset(identity).await?;
        }
        Ok(())
    }
}
