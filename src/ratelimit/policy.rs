//! Limiter configuration values.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RateLimiterError, Result};

/// The admission algorithm of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    FixedWindow,
    TokenBucket,
    SlidingWindow,
    NoLimit,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::FixedWindow => "fixed_window",
            PolicyKind::TokenBucket => "token_bucket",
            PolicyKind::SlidingWindow => "sliding_window",
            PolicyKind::NoLimit => "no_limit",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = RateLimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed_window" => Ok(PolicyKind::FixedWindow),
            "token_bucket" => Ok(PolicyKind::TokenBucket),
            "sliding_window" => Ok(PolicyKind::SlidingWindow),
            "no_limit" => Ok(PolicyKind::NoLimit),
            other => Err(RateLimiterError::Config(format!(
                "unknown policy \"{}\", expected one of fixed_window, token_bucket, sliding_window, no_limit",
                other
            ))),
        }
    }
}

/// Refill rate of a token bucket: `amount` tokens every `interval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    pub interval: Duration,
    pub amount: u64,
}

impl Rate {
    pub fn new(interval: Duration, amount: u64) -> Self {
        Self { interval, amount }
    }

    /// `amount` tokens per second.
    pub fn per_second(amount: u64) -> Self {
        Self::new(Duration::from_secs(1), amount)
    }

    /// Tokens added per second of elapsed time.
    pub fn tokens_per_second(&self) -> f64 {
        self.amount as f64 / self.interval.as_secs_f64()
    }
}

/// Configuration of one named limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    /// Unique limiter name
    pub id: String,
    pub policy: PolicyKind,
    /// Maximum hits per window, or the bucket's burst size
    pub limit: u64,
    /// Window length, required by `fixed_window` and `sliding_window`
    pub interval: Option<Duration>,
    /// Refill rate, required by `token_bucket`
    pub rate: Option<Rate>,
}

impl LimiterConfig {
    pub fn fixed_window(id: impl Into<String>, limit: u64, interval: Duration) -> Self {
        Self {
            id: id.into(),
            policy: PolicyKind::FixedWindow,
            limit,
            interval: Some(interval),
            rate: None,
        }
    }

    pub fn sliding_window(id: impl Into<String>, limit: u64, interval: Duration) -> Self {
        Self {
            id: id.into(),
            policy: PolicyKind::SlidingWindow,
            limit,
            interval: Some(interval),
            rate: None,
        }
    }

    pub fn token_bucket(id: impl Into<String>, limit: u64, rate: Rate) -> Self {
        Self {
            id: id.into(),
            policy: PolicyKind::TokenBucket,
            limit,
            interval: None,
            rate: Some(rate),
        }
    }

    pub fn no_limit(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            policy: PolicyKind::NoLimit,
            limit: u64::MAX,
            interval: None,
            rate: None,
        }
    }

    /// Check that the parameters required by the policy are present and sane.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(self.invalid("limiter id must not be empty"));
        }
        if self.limit == 0 {
            return Err(self.invalid("\"limit\" must be a positive integer"));
        }

        match self.policy {
            PolicyKind::FixedWindow | PolicyKind::SlidingWindow => {
                self.required_interval()?;
            }
            PolicyKind::TokenBucket => {
                self.required_rate()?;
            }
            PolicyKind::NoLimit => {}
        }

        Ok(())
    }

    pub(crate) fn required_interval(&self) -> Result<Duration> {
        match self.interval {
            Some(interval) if !interval.is_zero() => Ok(interval),
            Some(_) => Err(self.invalid("\"interval\" must be greater than zero")),
            None => Err(self.invalid(&format!(
                "\"interval\" is required by the {} policy",
                self.policy
            ))),
        }
    }

    pub(crate) fn required_rate(&self) -> Result<Rate> {
        match self.rate {
            Some(rate) if !rate.interval.is_zero() => Ok(rate),
            Some(_) => Err(self.invalid("\"rate.interval\" must be greater than zero")),
            None => Err(self.invalid("\"rate\" is required by the token_bucket policy")),
        }
    }

    fn invalid(&self, reason: &str) -> RateLimiterError {
        RateLimiterError::Config(format!("limiter \"{}\": {}", self.id, reason))
    }
}
