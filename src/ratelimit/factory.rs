//! Construction of limiters from named configurations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{RateLimiterError, Result};
use crate::lock::LockFactory;
use crate::storage::Storage;

use super::compound::CompoundLimiter;
use super::limiter::{Limiter, DEFAULT_LOCK_TIMEOUT};
use super::policy::LimiterConfig;
use super::strategy::Strategy;

/// Everything needed to build one named limiter.
#[derive(Debug, Clone)]
pub struct LimiterDefinition {
    pub config: LimiterConfig,
    pub storage: Arc<dyn Storage>,
    /// `None` disables locking for this limiter
    pub lock: Option<Arc<dyn LockFactory>>,
    pub lock_timeout: Duration,
}

impl LimiterDefinition {
    pub fn new(config: LimiterConfig, storage: Arc<dyn Storage>) -> Self {
        Self {
            config,
            storage,
            lock: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn LockFactory>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// Builds limiters by name.
///
/// Definitions are validated when registered, so a factory only ever holds
/// configurations that construct successfully.
#[derive(Debug)]
pub struct RateLimiterFactory {
    definitions: HashMap<String, LimiterDefinition>,
    clock: Arc<dyn Clock>,
}

impl RateLimiterFactory {
    /// Create an empty factory using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            definitions: HashMap::new(),
            clock,
        }
    }

    /// Add a limiter under `definition.config.id`.
    pub fn register(&mut self, definition: LimiterDefinition) -> Result<()> {
        Strategy::from_config(&definition.config)?;

        let name = definition.config.id.clone();
        if self.definitions.contains_key(&name) {
            return Err(RateLimiterError::Config(format!(
                "rate limiter \"{}\" is already registered",
                name
            )));
        }

        debug!(
            name = %name,
            policy = %definition.config.policy,
            limit = definition.config.limit,
            locking = definition.lock.is_some(),
            "Registered rate limiter"
        );
        self.definitions.insert(name, definition);
        Ok(())
    }

    /// Build the limiter configured as `name`.
    pub fn create(&self, name: &str) -> Result<Limiter> {
        let definition = self.definition(name)?;

        let mut limiter = Limiter::new(&definition.config, Arc::clone(&definition.storage))?
            .with_clock(Arc::clone(&self.clock));
        if let Some(lock) = &definition.lock {
            limiter = limiter.with_lock(Arc::clone(lock), definition.lock_timeout);
        }
        Ok(limiter)
    }

    /// Build the limiter configured as `name`, keeping its own state for `key`.
    ///
    /// Limiters for different keys share the policy but not the budget,
    /// e.g. one budget per user or per client address.
    pub fn create_for(&self, name: &str, key: &str) -> Result<Limiter> {
        let limiter = self.create(name)?;
        Ok(limiter.with_id(format!("{}-{}", name, key)))
    }

    /// Combine several configured limiters into one, optionally scoped to `key`.
    pub fn create_compound(&self, names: &[&str], key: Option<&str>) -> Result<CompoundLimiter> {
        let limiters = names
            .iter()
            .map(|name| match key {
                Some(key) => self.create_for(name, key),
                None => self.create(name),
            })
            .collect::<Result<Vec<_>>>()?;
        CompoundLimiter::new(limiters)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Names of all registered limiters, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn definition(&self, name: &str) -> Result<&LimiterDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| RateLimiterError::UnknownLimiter(name.to_string()))
    }

    /// Get the number of registered limiters.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for RateLimiterFactory {
    fn default() -> Self {
        Self::new()
    }
}
