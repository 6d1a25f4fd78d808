//! Error types for the floodgate library.

use std::time::Duration;
use thiserror::Error;

/// Main error type for floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Invalid limiter or rule configuration, rejected at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage transport or serialization failure (distributed limiters only).
    ///
    /// Distinct from a reject decision: the limit state could not be consulted
    /// at all. Callers decide whether to fail open or closed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A distributed check did not complete within its bounded timeout.
    #[error("Storage operation timed out after {0:?}")]
    StorageTimeout(Duration),

    /// I/O errors (rule file loading)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
