//! Floodgate - Request-Admission Rate Limiting
//!
//! This crate is a library of interchangeable admission algorithms: given an
//! identity (IP, user, API key, global), each decides whether the next unit
//! of work may proceed right now and, if not, when it may. Six algorithms
//! share one contract (token bucket, leaky bucket, fixed window, sliding
//! window log, sliding window counter, concurrent requests), compose into
//! multi-tier limiters, and the counter-based ones can be re-targeted at
//! shared storage for fleet-wide enforcement.
//!
//! Local limiters are synchronous and infallible; distributed limiters are
//! async, bounded by timeouts, and surface storage failures as errors
//! distinct from reject decisions. All time flows through an injectable
//! clock so behavior is testable without sleeping.

pub mod clock;
pub mod distributed;
pub mod error;
pub mod limit;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FloodgateError, Result};
pub use limit::{Decision, RateLimiter};
