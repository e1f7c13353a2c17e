//! The result of a rate limit check.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{RateLimiterError, Result};

/// Retry delay reported for requests that can never be admitted, such as a
/// request larger than the limiter's capacity.
pub const NEVER_RETRY: Duration = Duration::from_secs(u32::MAX as u64);

/// Decision returned by a limiter.
///
/// When the request is rejected, `remaining_tokens` is zero and
/// `retry_after` is always set.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimit {
    accepted: bool,
    limit: u64,
    remaining_tokens: u64,
    retry_after: Option<Duration>,
    reset_at: DateTime<Utc>,
}

impl RateLimit {
    pub(crate) fn accepted(limit: u64, remaining_tokens: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            accepted: true,
            limit,
            remaining_tokens,
            retry_after: None,
            reset_at,
        }
    }

    pub(crate) fn rejected(limit: u64, retry_after: Duration, reset_at: DateTime<Utc>) -> Self {
        Self {
            accepted: false,
            limit,
            remaining_tokens: 0,
            retry_after: Some(retry_after),
            reset_at,
        }
    }

    /// Whether the request was admitted.
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    /// The configured maximum.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Tokens still available after this decision.
    pub fn remaining_tokens(&self) -> u64 {
        self.remaining_tokens
    }

    /// How long to wait before the same request can succeed.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// When the limiter is back at full capacity.
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.reset_at
    }

    /// Whether the rejection can never turn into an acceptance by waiting.
    pub fn is_unsatisfiable(&self) -> bool {
        self.retry_after == Some(NEVER_RETRY)
    }

    /// Turn a rejection into an error, for callers that want `?` propagation.
    pub fn ensure_accepted(self) -> Result<Self> {
        if self.accepted {
            Ok(self)
        } else {
            Err(RateLimiterError::RateLimitExceeded(Box::new(self)))
        }
    }

    /// Pick the more restrictive of two decisions.
    ///
    /// A rejection beats an acceptance; otherwise fewer remaining tokens wins.
    pub(crate) fn most_restrictive(self, other: RateLimit) -> RateLimit {
        match (self.accepted, other.accepted) {
            (true, false) => other,
            (false, true) => self,
            (false, false) => {
                if other.retry_after > self.retry_after {
                    other
                } else {
                    self
                }
            }
            (true, true) => {
                if other.remaining_tokens < self.remaining_tokens {
                    other
                } else {
                    self
                }
            }
        }
    }
}
