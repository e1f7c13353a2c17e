//! Error types for rate limiter operations.

use std::time::Duration;

use thiserror::Error;

use crate::ratelimit::RateLimit;

/// Main error type for rate limiter operations.
///
/// A request that is over its limit is not an error: it is reported through
/// [`RateLimit::is_accepted`]. Only [`RateLimit::ensure_accepted`] turns it
/// into [`RateLimiterError::RateLimitExceeded`].
#[derive(Error, Debug)]
pub enum RateLimiterError {
    /// Bad or missing parameters, detected when a limiter is constructed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Factory lookup for a name that was never configured
    #[error("Unknown rate limiter: {0}")]
    UnknownLimiter(String),

    /// The backing store could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The per-limiter lock was not acquired in time
    #[error("Timed out after {timeout:?} acquiring lock for rate limiter {id}")]
    LockTimeout { id: String, timeout: Duration },

    /// Invalid call arguments (e.g. a negative token count)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Raised only by `RateLimit::ensure_accepted`
    #[error("Rate limit exceeded, retry after {:?}", retry_delay(.0))]
    RateLimitExceeded(Box<RateLimit>),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn retry_delay(limit: &RateLimit) -> Duration {
    limit.retry_after().unwrap_or_default()
}

/// Result type alias for rate limiter operations.
pub type Result<T> = std::result::Result<T, RateLimiterError>;
