//! Rate limit rules configuration.
//!
//! Declarative tier definitions, loaded from YAML and built into
//! [`MultiTierLimiter`]s. Validation happens at load time: a rule set that
//! parses but cannot build (empty tier list, bad rate) is rejected before any
//! traffic is admitted against it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::error::{FloodgateError, Result};

use super::{
    ConcurrentRequests, FixedWindow, LeakyBucket, MultiTierLimiter, RateLimiter,
    SlidingWindowCounter, SlidingWindowLog, TokenBucket,
};

/// A complete rule set: per-identity tier lists plus a default.
///
/// ```yaml
/// identities:
///   api_key:
///     tiers:
///       - algorithm: token_bucket
///         capacity: 10
///         refill_per_second: 2.0
///       - algorithm: fixed_window
///         window_ms: 3600000
///         limit: 1000
/// default:
///   tiers:
///     - algorithm: sliding_window_counter
///       window_ms: 1000
///       limit: 50
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    /// Tier lists keyed by identity class (IP, user, API key, ...).
    #[serde(default)]
    pub identities: HashMap<String, IdentityRules>,
    /// Tiers applied to identities without an explicit entry.
    #[serde(default)]
    pub default: Option<IdentityRules>,
}

/// The ordered tiers enforced for one identity class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRules {
    pub tiers: Vec<TierRule>,
}

/// A single tier: one algorithm with its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum TierRule {
    TokenBucket { capacity: u64, refill_per_second: f64 },
    LeakyBucket { capacity: u64, leak_per_second: f64 },
    FixedWindow { window_ms: u64, limit: u64 },
    SlidingWindowLog { window_ms: u64, limit: u64 },
    SlidingWindowCounter { window_ms: u64, limit: u64 },
    ConcurrentRequests { max_concurrent: u64 },
}

impl TierRule {
    /// Instantiate the configured algorithm against the given clock.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Result<Box<dyn RateLimiter>> {
        Ok(match *self {
            TierRule::TokenBucket {
                capacity,
                refill_per_second,
            } => Box::new(TokenBucket::with_clock(capacity, refill_per_second, clock)?),
            TierRule::LeakyBucket {
                capacity,
                leak_per_second,
            } => Box::new(LeakyBucket::with_clock(capacity, leak_per_second, clock)?),
            TierRule::FixedWindow { window_ms, limit } => {
                Box::new(FixedWindow::with_clock(window_ms, limit, clock)?)
            }
            TierRule::SlidingWindowLog { window_ms, limit } => {
                Box::new(SlidingWindowLog::with_clock(window_ms, limit, clock)?)
            }
            TierRule::SlidingWindowCounter { window_ms, limit } => {
                Box::new(SlidingWindowCounter::with_clock(window_ms, limit, clock)?)
            }
            TierRule::ConcurrentRequests { max_concurrent } => {
                Box::new(ConcurrentRequests::new(max_concurrent))
            }
        })
    }
}

impl IdentityRules {
    /// Build the composed limiter for this identity class.
    pub fn build(&self, clock: Arc<dyn Clock>) -> Result<MultiTierLimiter> {
        let tiers = self
            .tiers
            .iter()
            .map(|rule| rule.build(clock.clone()))
            .collect::<Result<Vec<_>>>()?;
        MultiTierLimiter::new(tiers)
    }
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a rule set from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load and validate a rule set from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RuleSet = serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse rules: {}", e)))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Check that every configured identity builds a working limiter.
    pub fn validate(&self) -> Result<()> {
        let clock = SystemClock::shared();
        for (identity, rules) in &self.identities {
            rules.build(clock.clone()).map_err(|e| {
                FloodgateError::Config(format!("identity '{}': {}", identity, e))
            })?;
        }
        if let Some(default) = &self.default {
            default
                .build(clock)
                .map_err(|e| FloodgateError::Config(format!("default rules: {}", e)))?;
        }
        Ok(())
    }

    /// The tier list applying to `identity`: its explicit entry, or the
    /// default.
    pub fn rules_for(&self, identity: &str) -> Option<&IdentityRules> {
        self.identities.get(identity).or(self.default.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tiered_rules() {
        let yaml = r#"
identities:
  api_key:
    tiers:
      - algorithm: token_bucket
        capacity: 10
        refill_per_second: 2.0
      - algorithm: fixed_window
        window_ms: 3600000
        limit: 1000
default:
  tiers:
    - algorithm: sliding_window_counter
      window_ms: 1000
      limit: 50
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.identities["api_key"].tiers.len(), 2);
        assert_eq!(
            rules.identities["api_key"].tiers[0],
            TierRule::TokenBucket {
                capacity: 10,
                refill_per_second: 2.0
            }
        );
        assert!(rules.default.is_some());
    }

    #[test]
    fn test_rules_for_falls_back_to_default() {
        let yaml = r#"
identities:
  ip:
    tiers:
      - algorithm: leaky_bucket
        capacity: 5
        leak_per_second: 1.0
default:
  tiers:
    - algorithm: fixed_window
      window_ms: 1000
      limit: 20
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        assert_eq!(rules.rules_for("ip").unwrap().tiers.len(), 1);
        let fallback = rules.rules_for("unknown").unwrap();
        assert_eq!(
            fallback.tiers[0],
            TierRule::FixedWindow {
                window_ms: 1000,
                limit: 20
            }
        );
    }

    #[test]
    fn test_invalid_parameters_fail_at_load() {
        let yaml = r#"
identities:
  api_key:
    tiers:
      - algorithm: token_bucket
        capacity: 10
        refill_per_second: 0.0
"#;
        let err = RuleSet::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_empty_tier_list_fails_at_load() {
        let yaml = r#"
identities:
  api_key:
    tiers: []
"#;
        assert!(RuleSet::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_algorithm_fails_to_parse() {
        let yaml = r#"
identities:
  api_key:
    tiers:
      - algorithm: quantum_bucket
        capacity: 10
"#;
        assert!(RuleSet::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_built_limiter_enforces_tiers() {
        let yaml = r#"
default:
  tiers:
    - algorithm: fixed_window
      window_ms: 1000
      limit: 2
"#;
        let rules = RuleSet::from_yaml(yaml).unwrap();
        let limiter = rules
            .rules_for("anyone")
            .unwrap()
            .build(SystemClock::shared())
            .unwrap();

        use crate::limit::RateLimiter;
        assert!(limiter.allow(1).allowed);
        assert!(limiter.allow(1).allowed);
        assert!(!limiter.allow(1).allowed);
    }
}
