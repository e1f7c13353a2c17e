//! Settings for named limiters and their wiring to storage and locks.
//!
//! A settings document lists limiters by name:
//!
//! ```yaml
//! limiters:
//!   login:
//!     policy: fixed_window
//!     limit: 5
//!     interval: 15 minutes
//!   api:
//!     policy: token_bucket
//!     limit: 100
//!     rate: { interval: 1 second, amount: 10 }
//!     lock_factory: null
//! ```
//!
//! The `limiters` key may be left out, in which case the whole mapping is
//! read as the limiter map. Storage and lock names are resolved against a
//! [`HandleRegistry`] built by the application at startup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ::config::Source;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{RateLimiterError, Result};
use crate::lock::LockFactory;
use crate::ratelimit::{LimiterConfig, LimiterDefinition, PolicyKind, Rate, RateLimiterFactory};
use crate::storage::Storage;

/// Name of the storage handle used when a limiter names none.
pub const DEFAULT_CACHE_POOL: &str = "cache.rate_limiter";
/// Name of the lock handle used when a limiter names none.
pub const DEFAULT_LOCK_FACTORY: &str = "lock.factory";

/// Top-level rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSettings {
    /// When false, no limiter is registered
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Limiter settings by name
    #[serde(default)]
    pub limiters: HashMap<String, LimiterSettings>,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            limiters: HashMap::new(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Settings of one named limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// The algorithm used by this limiter
    pub policy: PolicyKind,

    /// The maximum allowed hits in a window, or the bucket's burst size
    pub limit: u64,

    /// Window length for `fixed_window` and `sliding_window`, e.g. "1 minute"
    #[serde(default)]
    pub interval: Option<String>,

    /// Refill rate for `token_bucket`
    #[serde(default)]
    pub rate: Option<RateSettings>,

    /// Lock handle serializing this limiter, or null to disable locking
    #[serde(default = "default_lock_factory")]
    pub lock_factory: Option<String>,

    /// Storage handle holding the limiter state
    #[serde(default = "default_cache_pool")]
    pub cache_pool: String,

    /// Custom storage handle, takes precedence over `cache_pool`
    #[serde(default)]
    pub storage_service: Option<String>,

    /// Upper bound on waiting for the lock, e.g. "2 seconds"
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: String,
}

fn default_lock_factory() -> Option<String> {
    Some(DEFAULT_LOCK_FACTORY.to_string())
}

fn default_cache_pool() -> String {
    DEFAULT_CACHE_POOL.to_string()
}

fn default_lock_timeout() -> String {
    "5 seconds".to_string()
}

/// Token bucket refill settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSettings {
    /// How often tokens are added, e.g. "1 second"
    pub interval: String,

    /// Tokens added each interval
    #[serde(default = "default_rate_amount")]
    pub amount: u64,
}

fn default_rate_amount() -> u64 {
    1
}

impl LimiterSettings {
    /// Convert to the limiter configuration for `name`.
    pub fn to_config(&self, name: &str) -> Result<LimiterConfig> {
        let interval = self
            .interval
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|e| in_limiter(name, e))?;
        let rate = self
            .rate
            .as_ref()
            .map(|rate| {
                parse_duration(&rate.interval).map(|interval| Rate::new(interval, rate.amount))
            })
            .transpose()
            .map_err(|e| in_limiter(name, e))?;

        let config = LimiterConfig {
            id: name.to_string(),
            policy: self.policy,
            limit: self.limit,
            interval,
            rate,
        };
        config.validate()?;
        Ok(config)
    }

    /// The storage handle name, `storage_service` first.
    pub fn storage_handle(&self) -> &str {
        self.storage_service.as_deref().unwrap_or(&self.cache_pool)
    }
}

fn in_limiter(name: &str, error: RateLimiterError) -> RateLimiterError {
    match error {
        RateLimiterError::Config(reason) => {
            RateLimiterError::Config(format!("limiter \"{}\": {}", name, reason))
        }
        other => other,
    }
}

/// Storage and lock handles available to limiter settings, by name.
#[derive(Debug, Default, Clone)]
pub struct HandleRegistry {
    storages: HashMap<String, Arc<dyn Storage>>,
    locks: HashMap<String, Arc<dyn LockFactory>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(mut self, name: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        self.storages.insert(name.into(), storage);
        self
    }

    pub fn with_lock_factory(
        mut self,
        name: impl Into<String>,
        lock: Arc<dyn LockFactory>,
    ) -> Self {
        self.locks.insert(name.into(), lock);
        self
    }

    pub fn storage(&self, name: &str) -> Result<Arc<dyn Storage>> {
        self.storages
            .get(name)
            .cloned()
            .ok_or_else(|| RateLimiterError::Config(format!("unknown storage \"{}\"", name)))
    }

    pub fn lock_factory(&self, name: &str) -> Result<Arc<dyn LockFactory>> {
        self.locks
            .get(name)
            .cloned()
            .ok_or_else(|| RateLimiterError::Config(format!("unknown lock factory \"{}\"", name)))
    }
}

impl RateLimiterSettings {
    /// Load settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limiter settings");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_value(parse_yaml(yaml)?)
    }

    /// Load settings from a file, with `RATEKEEPER__*` environment overrides.
    ///
    /// `RATEKEEPER__LIMITERS__LOGIN__LIMIT=20` overrides the limit of the
    /// `login` limiter. Overrides always use the full form, also when the
    /// file uses the shorthand, and match limiter names case-insensitively.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`RateLimiterSettings::load`], reading overrides from `env`
    /// instead of the process environment when given.
    fn load_with_env<P: AsRef<Path>>(
        path: P,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limiter settings");

        let contents = std::fs::read_to_string(path)?;
        let mut value = normalize(parse_yaml(&contents)?);

        let overrides = ::config::Environment::with_prefix("RATEKEEPER")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(env)
            .collect()
            .map_err(|e| {
                RateLimiterError::Config(format!("Failed to read environment overrides: {}", e))
            })?;

        let mut keys: Vec<&String> = overrides.keys().collect();
        keys.sort();
        for key in keys {
            let override_value: serde_yaml::Value =
                overrides[key].clone().try_deserialize().map_err(|e| {
                    RateLimiterError::Config(format!("Invalid override for {}: {}", key, e))
                })?;
            debug!(key = %key, "Applying environment override");
            apply_override(&mut value, key, override_value)?;
        }

        Self::from_value(value)
    }

    /// Accept both the full form and the shorthand without `limiters`.
    fn from_value(value: serde_yaml::Value) -> Result<Self> {
        serde_yaml::from_value(normalize(value))
            .map_err(|e| RateLimiterError::Config(format!("Invalid rate limiter settings: {}", e)))
    }

    /// Build a factory holding every configured limiter.
    ///
    /// All limiters are validated and their handles resolved here, so
    /// configuration mistakes surface before any request is served.
    pub fn build_factory(
        &self,
        handles: &HandleRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<RateLimiterFactory> {
        let mut factory = RateLimiterFactory::with_clock(clock);
        if !self.enabled {
            info!("Rate limiting is disabled");
            return Ok(factory);
        }

        let mut names: Vec<&String> = self.limiters.keys().collect();
        names.sort();
        for name in names {
            let settings = &self.limiters[name];
            let config = settings.to_config(name)?;
            let storage = handles
                .storage(settings.storage_handle())
                .map_err(|e| in_limiter(name, e))?;
            let lock_timeout =
                parse_duration(&settings.lock_timeout).map_err(|e| in_limiter(name, e))?;

            let mut definition =
                LimiterDefinition::new(config, storage).with_lock_timeout(lock_timeout);
            if let Some(lock) = &settings.lock_factory {
                let lock = handles.lock_factory(lock).map_err(|e| in_limiter(name, e))?;
                definition = definition.with_lock(lock);
            }
            factory.register(definition)?;
        }

        info!(limiters = factory.len(), "Rate limiters configured");
        Ok(factory)
    }
}

fn parse_yaml(yaml: &str) -> Result<serde_yaml::Value> {
    serde_yaml::from_str(yaml).map_err(|e| {
        RateLimiterError::Config(format!("Failed to parse rate limiter settings: {}", e))
    })
}

/// Rewrite the shorthand form into the full form with a `limiters` key.
fn normalize(value: serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        serde_yaml::Value::Mapping(mut map) if !map.contains_key("limiters") => {
            let enabled = map.remove("enabled");
            let mut normalized = serde_yaml::Mapping::new();
            if let Some(enabled) = enabled {
                normalized.insert("enabled".into(), enabled);
            }
            normalized.insert("limiters".into(), serde_yaml::Value::Mapping(map));
            serde_yaml::Value::Mapping(normalized)
        }
        other => other,
    }
}

/// Set the dotted `key` in `value`, matching existing keys case-insensitively.
fn apply_override(
    value: &mut serde_yaml::Value,
    key: &str,
    replacement: serde_yaml::Value,
) -> Result<()> {
    let mut segments = key.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let serde_yaml::Value::Mapping(map) = current else {
            return Err(RateLimiterError::Config(format!(
                "cannot override {}: \"{}\" is not a mapping",
                key, segment
            )));
        };
        let existing = map
            .keys()
            .find(|k| k.as_str() == Some(segment))
            .or_else(|| {
                map.keys()
                    .find(|k| k.as_str().is_some_and(|k| k.eq_ignore_ascii_case(segment)))
            })
            .cloned()
            .unwrap_or_else(|| serde_yaml::Value::String(segment.to_string()));

        if segments.peek().is_none() {
            map.insert(existing, replacement);
            return Ok(());
        }
        current = map
            .entry(existing)
            .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    }
    Ok(())
}

/// Parse a duration such as `"1 second"`, `"15 minutes"` or `"1.5 hours"`.
///
/// Units are second, minute, hour, day, week, month (30 days) and year
/// (365 days), singular or plural.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || {
        RateLimiterError::Config(format!(
            "invalid interval \"{}\": expected a number followed by second, minute, hour, day, week, month or year",
            input
        ))
    };

    let mut parts = input.split_whitespace();
    let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };

    let amount: f64 = amount.parse().map_err(|_| invalid())?;
    if !amount.is_finite() || amount <= 0.0 {
        return Err(invalid());
    }

    let unit = unit.to_ascii_lowercase();
    let seconds_per_unit = match unit.strip_suffix('s').unwrap_or(&unit) {
        "second" => 1.0,
        "minute" => 60.0,
        "hour" => 3_600.0,
        "day" => 86_400.0,
        "week" => 604_800.0,
        "month" => 2_592_000.0,
        "year" => 31_536_000.0,
        _ => return Err(invalid()),
    };

    Duration::try_from_secs_f64(amount * seconds_per_unit).map_err(|_| invalid())
}
