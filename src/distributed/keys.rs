//! Storage key addressing.
//!
//! Key layout is wire-stable: deployments sharing a store across library
//! versions depend on it byte for byte. Window-anchored keys embed the
//! window start in epoch seconds:
//!
//! ```text
//! <prefix>:<identity>:<windowStartEpochSeconds>
//! ```
//!
//! and token-bucket state lives at `<prefix>:<identity>`.

/// Prefix used when the caller does not supply one.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// Key for a window counter anchored at `window_start_ms`.
pub(crate) fn window_key(prefix: &str, identity: &str, window_start_ms: u64) -> String {
    format!("{}:{}:{}", prefix, identity, window_start_ms / 1000)
}

/// Key for token-bucket state.
pub(crate) fn bucket_key(prefix: &str, identity: &str) -> String {
    format!("{}:{}", prefix, identity)
}
