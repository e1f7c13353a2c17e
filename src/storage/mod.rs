//! Persistence of limiter state.
//!
//! A [`Storage`] holds one [`LimiterState`] per limiter id. Reads of missing
//! or expired ids return `None`; the limiter substitutes the policy's fresh
//! state. Failures to reach the backing medium surface as
//! [`RateLimiterError::StorageUnavailable`](crate::error::RateLimiterError::StorageUnavailable)
//! and are never turned into an allow or deny decision.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::Result;
use crate::ratelimit::LimiterState;

/// Backing store for limiter state.
///
/// `save` replaces the whole record for an id. Read-modify-write cycles
/// are serialized by the limiter's lock when one is configured.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Load the state stored under `id`, or `None` if absent or expired.
    fn fetch(&self, id: &str) -> Result<Option<LimiterState>>;

    /// Store `state` under `id`. With a `ttl`, the record expires after it.
    fn save(&self, id: &str, state: &LimiterState, ttl: Option<Duration>) -> Result<()>;

    /// Remove the state stored under `id`. Missing ids are not an error.
    fn delete(&self, id: &str) -> Result<()>;
}

/// Absolute expiry for a record written at `now`.
pub(crate) fn expires_at(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.map(|ttl| {
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}

pub(crate) fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}
