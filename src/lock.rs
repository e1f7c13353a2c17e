//! Mutual exclusion for limiter read-modify-write cycles.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{RateLimiterError, Result};

/// A held lock. Dropping it releases the lock.
pub trait LockGuard: fmt::Debug {}

/// Hands out per-key locks.
pub trait LockFactory: Send + Sync + fmt::Debug {
    /// Acquire the lock for `key`, waiting at most `timeout`.
    ///
    /// Fails with [`RateLimiterError::LockTimeout`] when the lock is still
    /// held by someone else after `timeout`.
    fn acquire(&self, key: &str, timeout: Duration) -> Result<Box<dyn LockGuard>>;
}

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Per-key locks shared by the threads of one process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockFactory {
    table: Arc<LockTable>,
}

impl InMemoryLockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently locked.
    pub fn is_locked(&self, key: &str) -> bool {
        self.table.held.lock().contains(key)
    }
}

impl LockFactory for InMemoryLockFactory {
    fn acquire(&self, key: &str, timeout: Duration) -> Result<Box<dyn LockGuard>> {
        // A timeout past the end of `Instant` means waiting without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut held = self.table.held.lock();

        while held.contains(key) {
            let Some(deadline) = deadline else {
                self.table.released.wait(&mut held);
                continue;
            };
            let timed_out = self.table.released.wait_until(&mut held, deadline).timed_out();
            if timed_out && held.contains(key) {
                return Err(RateLimiterError::LockTimeout {
                    id: key.to_string(),
                    timeout,
                });
            }
        }

        held.insert(key.to_string());
        trace!(key = %key, "Lock acquired");

        Ok(Box::new(InMemoryLockGuard {
            table: Arc::clone(&self.table),
            key: key.to_string(),
        }))
    }
}

#[derive(Debug)]
struct InMemoryLockGuard {
    table: Arc<LockTable>,
    key: String,
}

impl LockGuard for InMemoryLockGuard {}

impl Drop for InMemoryLockGuard {
    fn drop(&mut self) {
        self.table.held.lock().remove(&self.key);
        self.table.released.notify_all();
        trace!(key = %self.key, "Lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = InMemoryLockFactory::new();

        let guard = locks.acquire("a", Duration::from_millis(10)).unwrap();
        assert!(locks.is_locked("a"));

        drop(guard);
        assert!(!locks.is_locked("a"));
    }

    #[test]
    fn test_contended_lock_times_out() {
        let locks = InMemoryLockFactory::new();
        let _held = locks.acquire("a", Duration::from_millis(10)).unwrap();

        let err = locks.acquire("a", Duration::from_millis(20)).unwrap_err();
        match err {
            RateLimiterError::LockTimeout { id, timeout } => {
                assert_eq!(id, "a");
                assert_eq!(timeout, Duration::from_millis(20));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_keys_are_independent() {
        let locks = InMemoryLockFactory::new();
        let _a = locks.acquire("a", Duration::from_millis(10)).unwrap();

        assert!(locks.acquire("b", Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_unbounded_timeout_waits_for_release() {
        let locks = InMemoryLockFactory::new();
        assert!(locks.acquire("a", Duration::MAX).is_ok());

        let guard = locks.acquire("a", Duration::MAX).unwrap();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| locks.acquire("a", Duration::MAX).map(|_| ()));
            std::thread::sleep(Duration::from_millis(20));
            drop(guard);
            assert!(waiter.join().unwrap().is_ok());
        });
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let locks = InMemoryLockFactory::new();
        let guard = locks.acquire("a", Duration::from_millis(10)).unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| locks.acquire("a", Duration::from_secs(5)).map(|_| ()));
            std::thread::sleep(Duration::from_millis(20));
            drop(guard);
            assert!(waiter.join().unwrap().is_ok());
        });
    }
}
