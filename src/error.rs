//! Error types for Sluice.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Sluice operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limiter was given parameters it cannot enforce
    #[error("Invalid limit for '{name}': {reason}")]
    InvalidLimit { name: String, reason: String },

    /// No limiter is registered under the requested name
    #[error("Unknown limiter: {0}")]
    UnknownLimiter(String),

    /// The limiter rejected the call outright
    #[error("Rate limit exceeded for '{limiter}', retry in {}ms", .retry_after.as_millis())]
    RateLimited { limiter: String, retry_after: Duration },

    /// Waiting for admission took longer than the caller allowed
    #[error("Timed out after {}ms waiting on '{limiter}'", .waited.as_millis())]
    Timeout { limiter: String, waited: Duration },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Sluice operations.
pub type Result<T> = std::result::Result<T, SluiceError>;
