//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::error::{RateLimiterError, Result};
use crate::lock::{LockFactory, LockGuard};
use crate::storage::Storage;

use super::policy::{LimiterConfig, PolicyKind};
use super::rate_limit::RateLimit;
use super::strategy::Strategy;

/// Default bound on waiting for the limiter lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One named rate limit.
///
/// The limiter holds no state of its own: every call loads the state from
/// storage, applies the policy and writes the result back. With a lock
/// factory configured the whole cycle runs under the lock for the limiter
/// id; without one, concurrent callers may race.
///
/// This struct is thread-safe and can be shared across multiple threads.
#[derive(Debug)]
pub struct Limiter {
    id: String,
    strategy: Strategy,
    storage: Arc<dyn Storage>,
    lock: Option<Arc<dyn LockFactory>>,
    lock_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Limiter {
    /// Create a limiter without locking.
    ///
    /// Fails with a configuration error if `config` lacks what its policy needs.
    pub fn new(config: &LimiterConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            strategy: Strategy::from_config(config)?,
            storage,
            lock: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            clock: Arc::new(SystemClock),
        })
    }

    /// Serialize calls through `lock`, waiting at most `timeout` for it.
    pub fn with_lock(mut self, lock: Arc<dyn LockFactory>, timeout: Duration) -> Self {
        self.lock = Some(lock);
        self.lock_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different storage id, e.g. one per user of a shared policy.
    pub(crate) fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    /// The id this limiter's state is stored under.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn policy(&self) -> PolicyKind {
        self.strategy.kind()
    }

    /// Whether calls are serialized by a lock.
    pub fn is_locking(&self) -> bool {
        self.lock.is_some()
    }

    /// Try to take `tokens` from the limiter.
    ///
    /// A rejection is a normal outcome reported through the returned
    /// [`RateLimit`]. Consuming zero tokens is the same as [`Limiter::peek`];
    /// a negative count is an invalid argument.
    pub fn consume(&self, tokens: i64) -> Result<RateLimit> {
        if tokens < 0 {
            return Err(RateLimiterError::InvalidArgument(format!(
                "cannot consume a negative number of tokens ({})",
                tokens
            )));
        }
        if tokens == 0 {
            return self.peek();
        }
        let tokens = tokens as u64;

        if !self.strategy.is_stateful() {
            return Ok(self.strategy.decide(None, self.clock.now(), tokens).rate_limit);
        }

        let _guard = self.acquire_lock()?;

        let stored = self.storage.fetch(&self.id)?;
        let now = self.clock.now();
        let decision = self.strategy.decide(stored.as_ref(), now, tokens);

        trace!(
            id = %self.id,
            policy = %self.strategy.kind(),
            tokens = tokens,
            accepted = decision.rate_limit.is_accepted(),
            remaining = decision.rate_limit.remaining_tokens(),
            "Checked rate limit"
        );

        if let Some(state) = decision.state {
            if stored.is_none() {
                debug!(id = %self.id, policy = %self.strategy.kind(), "Creating limiter state");
            }
            if stored.as_ref() != Some(&state) {
                self.storage.save(&self.id, &state, decision.ttl)?;
            }
        }

        if !decision.rate_limit.is_accepted() {
            debug!(
                id = %self.id,
                tokens = tokens,
                retry_after = ?decision.rate_limit.retry_after(),
                "Rate limit exceeded"
            );
        }

        Ok(decision.rate_limit)
    }

    /// Report the current standing without consuming anything.
    ///
    /// Never writes to storage.
    pub fn peek(&self) -> Result<RateLimit> {
        if !self.strategy.is_stateful() {
            return Ok(self.strategy.decide(None, self.clock.now(), 0).rate_limit);
        }

        let _guard = self.acquire_lock()?;
        let stored = self.storage.fetch(&self.id)?;
        Ok(self.strategy.decide(stored.as_ref(), self.clock.now(), 0).rate_limit)
    }

    /// Forget all consumption so the limiter is back at full capacity.
    pub fn reset(&self) -> Result<()> {
        if !self.strategy.is_stateful() {
            return Ok(());
        }

        let _guard = self.acquire_lock()?;
        self.storage.delete(&self.id)?;
        debug!(id = %self.id, "Limiter state reset");
        Ok(())
    }

    fn acquire_lock(&self) -> Result<Option<Box<dyn LockGuard>>> {
        self.lock
            .as_ref()
            .map(|lock| lock.acquire(&self.id, self.lock_timeout))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lock::InMemoryLockFactory;
    use crate::ratelimit::policy::Rate;
    use crate::ratelimit::state::{LimiterState, WindowState};
    use crate::storage::MemoryStorage;
    use chrono::DateTime;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap()))
    }

    fn limiter(config: LimiterConfig, clock: &Arc<ManualClock>) -> (Limiter, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::with_clock(clock.clone()));
        let limiter = Limiter::new(&config, storage.clone())
            .unwrap()
            .with_clock(clock.clone());
        (limiter, storage)
    }

    /// Storage that counts calls and can be switched off.
    #[derive(Debug, Default)]
    struct CountingStorage {
        inner: MemoryStorage,
        fetches: AtomicUsize,
        saves: AtomicUsize,
        down: Mutex<bool>,
    }

    impl CountingStorage {
        fn check(&self) -> Result<()> {
            if *self.down.lock() {
                Err(RateLimiterError::StorageUnavailable("storage is down".into()))
            } else {
                Ok(())
            }
        }
    }

    impl Storage for CountingStorage {
        fn fetch(&self, id: &str) -> Result<Option<LimiterState>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.inner.fetch(id)
        }

        fn save(&self, id: &str, state: &LimiterState, ttl: Option<Duration>) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.inner.save(id, state, ttl)
        }

        fn delete(&self, id: &str) -> Result<()> {
            self.check()?;
            self.inner.delete(id)
        }
    }

    #[test]
    fn test_fixed_window_resets_after_interval() {
        let clock = clock();
        let (limiter, _) = limiter(
            LimiterConfig::fixed_window("api", 10, Duration::from_secs(60)),
            &clock,
        );

        assert!(limiter.consume(10).unwrap().is_accepted());

        clock.advance(Duration::from_secs(59));
        let rejected = limiter.consume(1).unwrap();
        assert!(!rejected.is_accepted());
        assert_eq!(rejected.remaining_tokens(), 0);
        assert_eq!(rejected.retry_after(), Some(Duration::from_secs(1)));

        clock.advance(Duration::from_secs(1));
        assert!(limiter.consume(1).unwrap().is_accepted());
    }

    #[test]
    fn test_token_bucket_refill() {
        let clock = clock();
        let (limiter, _) = limiter(
            LimiterConfig::token_bucket("api", 10, Rate::per_second(1)),
            &clock,
        );

        let drained = limiter.consume(10).unwrap();
        assert!(drained.is_accepted());
        assert_eq!(drained.remaining_tokens(), 0);

        clock.advance(Duration::from_secs(5));
        assert_eq!(limiter.peek().unwrap().remaining_tokens(), 5);

        let rejected = limiter.consume(6).unwrap();
        assert!(!rejected.is_accepted());
        assert_eq!(rejected.retry_after(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_sliding_window_weights_previous_window() {
        let clock = clock();
        let (limiter, _) = limiter(
            LimiterConfig::sliding_window("api", 10, Duration::from_secs(60)),
            &clock,
        );

        assert!(limiter.consume(10).unwrap().is_accepted());

        clock.advance(Duration::from_secs(90));
        for _ in 0..5 {
            assert!(limiter.consume(1).unwrap().is_accepted());
        }
        assert!(!limiter.consume(1).unwrap().is_accepted());
    }

    #[test]
    fn test_no_limit_always_accepts() {
        let clock = clock();
        let (limiter, storage) = limiter(LimiterConfig::no_limit("open"), &clock);

        for _ in 0..100 {
            assert!(limiter.consume(1_000).unwrap().is_accepted());
        }
        assert!(storage.is_empty());
    }

    #[test]
    fn test_consume_zero_is_peek() {
        let clock = clock();
        let (limiter, storage) = limiter(
            LimiterConfig::fixed_window("api", 5, Duration::from_secs(60)),
            &clock,
        );
        limiter.consume(2).unwrap();
        let before = storage.fetch("api").unwrap();

        assert_eq!(limiter.consume(0).unwrap(), limiter.peek().unwrap());
        assert_eq!(limiter.peek().unwrap().remaining_tokens(), 3);
        assert_eq!(storage.fetch("api").unwrap(), before);
    }

    #[test]
    fn test_peek_is_idempotent() {
        let clock = clock();
        let storage = Arc::new(CountingStorage::default());
        let limiter = Limiter::new(
            &LimiterConfig::token_bucket("api", 10, Rate::new(Duration::from_secs(3600), 1)),
            storage.clone(),
        )
        .unwrap()
        .with_clock(clock.clone());
        limiter.consume(4).unwrap();
        clock.advance(Duration::from_secs(1800));
        let saves = storage.saves.load(Ordering::SeqCst);
        let before = serde_json::to_vec(&storage.inner.fetch("api").unwrap()).unwrap();

        let first = limiter.peek().unwrap();
        for _ in 0..10 {
            assert_eq!(limiter.peek().unwrap(), first);
        }

        let after = serde_json::to_vec(&storage.inner.fetch("api").unwrap()).unwrap();
        assert_eq!(before, after);
        assert_eq!(storage.saves.load(Ordering::SeqCst), saves);
    }

    #[test]
    fn test_negative_tokens_is_invalid() {
        let clock = clock();
        let (limiter, _) = limiter(
            LimiterConfig::fixed_window("api", 5, Duration::from_secs(60)),
            &clock,
        );

        assert!(matches!(
            limiter.consume(-1),
            Err(RateLimiterError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_one_fetch_and_one_save_per_consume() {
        let storage = Arc::new(CountingStorage::default());
        let limiter = Limiter::new(
            &LimiterConfig::fixed_window("api", 1, Duration::from_secs(60)),
            storage.clone(),
        )
        .unwrap()
        .with_clock(clock());

        limiter.consume(1).unwrap();
        assert_eq!(storage.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(storage.saves.load(Ordering::SeqCst), 1);

        // A rejection inside the same window leaves the state untouched.
        assert!(!limiter.consume(1).unwrap().is_accepted());
        assert_eq!(storage.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(storage.saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset_restores_capacity() {
        let clock = clock();
        let (limiter, storage) = limiter(
            LimiterConfig::fixed_window("api", 3, Duration::from_secs(60)),
            &clock,
        );
        limiter.consume(3).unwrap();
        assert!(!limiter.consume(1).unwrap().is_accepted());

        limiter.reset().unwrap();

        assert!(storage.is_empty());
        assert_eq!(limiter.peek().unwrap().remaining_tokens(), 3);
    }

    #[test]
    fn test_storage_failure_propagates_and_releases_lock() {
        let storage = Arc::new(CountingStorage::default());
        let locks = Arc::new(InMemoryLockFactory::new());
        let limiter = Limiter::new(
            &LimiterConfig::fixed_window("api", 3, Duration::from_secs(60)),
            storage.clone(),
        )
        .unwrap()
        .with_lock(locks.clone(), Duration::from_millis(50))
        .with_clock(clock());

        *storage.down.lock() = true;
        assert!(matches!(
            limiter.consume(1),
            Err(RateLimiterError::StorageUnavailable(_))
        ));
        assert!(matches!(
            limiter.peek(),
            Err(RateLimiterError::StorageUnavailable(_))
        ));
        assert!(!locks.is_locked("api"));

        *storage.down.lock() = false;
        assert!(limiter.consume(1).unwrap().is_accepted());
    }

    #[test]
    fn test_lock_timeout_is_reported() {
        let locks = Arc::new(InMemoryLockFactory::new());
        let (limiter, _) = limiter(
            LimiterConfig::fixed_window("api", 3, Duration::from_secs(60)),
            &clock(),
        );
        let limiter = limiter.with_lock(locks.clone(), Duration::from_millis(20));
        assert!(limiter.is_locking());

        let _held = locks.acquire("api", Duration::from_millis(20)).unwrap();

        assert!(matches!(
            limiter.consume(1),
            Err(RateLimiterError::LockTimeout { .. })
        ));
        assert!(matches!(
            limiter.reset(),
            Err(RateLimiterError::LockTimeout { .. })
        ));
    }

    #[test]
    fn test_concurrent_consumers_with_lock() {
        let storage = Arc::new(MemoryStorage::new());
        let limiter = Limiter::new(
            &LimiterConfig::fixed_window("shared", 50, Duration::from_secs(3600)),
            storage.clone(),
        )
        .unwrap()
        .with_lock(Arc::new(InMemoryLockFactory::new()), Duration::from_secs(10));

        let accepted = AtomicUsize::new(0);
        let rejected = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..100 {
                s.spawn(|| {
                    let decision = limiter.consume(1).unwrap();
                    if decision.is_accepted() {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    } else {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(accepted.load(Ordering::SeqCst), 50);
        assert_eq!(rejected.load(Ordering::SeqCst), 50);
        match storage.fetch("shared").unwrap() {
            Some(LimiterState::FixedWindow(WindowState { hits, .. })) => assert_eq!(hits, 50),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let mut config = LimiterConfig::fixed_window("api", 3, Duration::from_secs(60));
        config.interval = None;

        let result = Limiter::new(&config, Arc::new(MemoryStorage::new()));
        assert!(matches!(result, Err(RateLimiterError::Config(_))));
    }
}
