//! A policy that admits everything.

use chrono::{DateTime, Utc};

use super::rate_limit::RateLimit;

/// Always accepts. Keeps no state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoLimit;

impl NoLimit {
    pub fn decide(&self, now: DateTime<Utc>) -> RateLimit {
        RateLimit::accepted(u64::MAX, u64::MAX, now)
    }
}
