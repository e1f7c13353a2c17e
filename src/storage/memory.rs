//! In-process storage.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use super::{expires_at, is_expired, Storage};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::ratelimit::LimiterState;

#[derive(Debug, Clone)]
struct Entry {
    state: LimiterState,
    expires_at: Option<DateTime<Utc>>,
}

/// Limiter state kept in a concurrent map.
///
/// Expired records are dropped lazily on read, or in bulk by
/// [`MemoryStorage::purge_expired`].
#[derive(Debug)]
pub struct MemoryStorage {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` to evaluate expiry.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !is_expired(entry.expires_at, now));
        before - self.entries.len()
    }

    /// Number of records held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn fetch(&self, id: &str) -> Result<Option<LimiterState>> {
        let now = self.clock.now();
        let expired = match self.entries.get(id) {
            Some(entry) if !is_expired(entry.expires_at, now) => {
                return Ok(Some(entry.state.clone()))
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            trace!(id = %id, "Dropping expired limiter state");
            self.entries
                .remove_if(id, |_, entry| is_expired(entry.expires_at, now));
        }
        Ok(None)
    }

    fn save(&self, id: &str, state: &LimiterState, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry {
            state: state.clone(),
            expires_at: expires_at(self.clock.now(), ttl),
        };
        self.entries.insert(id.to_string(), entry);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }
}
