//! Error types for the rate limiter.

use thiserror::Error;

/// Main error type for rate limiter operations.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy with a zero cap or a zero-length window
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    /// The caller passed an empty throttling key
    #[error("Rate limit key must not be empty")]
    EmptyKey,

    /// A named policy lookup found nothing
    #[error("Unknown rate limit policy: {0}")]
    UnknownPolicy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;
