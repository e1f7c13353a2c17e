//! Dispatch over the closed set of admission policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::to_secs;
use crate::error::Result;

use super::fixed_window::FixedWindow;
use super::no_limit::NoLimit;
use super::policy::{LimiterConfig, PolicyKind};
use super::rate_limit::RateLimit;
use super::sliding_window::SlidingWindow;
use super::state::LimiterState;
use super::token_bucket::TokenBucket;

/// Outcome of applying a policy: the decision plus the state to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision<S> {
    pub rate_limit: RateLimit,
    pub state: S,
    /// How long the state must outlive this call; `None` keeps it forever
    pub ttl: Option<Duration>,
}

/// A configured admission policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    NoLimit(NoLimit),
    FixedWindow(FixedWindow),
    SlidingWindow(SlidingWindow),
    TokenBucket(TokenBucket),
}

impl Strategy {
    /// Build the strategy selected by `config.policy`.
    ///
    /// Fails if the parameters that policy needs are missing.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        config.validate()?;

        let strategy = match config.policy {
            PolicyKind::NoLimit => Strategy::NoLimit(NoLimit),
            PolicyKind::FixedWindow => {
                Strategy::FixedWindow(FixedWindow::new(config.limit, config.required_interval()?))
            }
            PolicyKind::SlidingWindow => Strategy::SlidingWindow(SlidingWindow::new(
                config.limit,
                config.required_interval()?,
            )),
            PolicyKind::TokenBucket => {
                Strategy::TokenBucket(TokenBucket::new(config.limit, config.required_rate()?))
            }
        };

        Ok(strategy)
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            Strategy::NoLimit(_) => PolicyKind::NoLimit,
            Strategy::FixedWindow(_) => PolicyKind::FixedWindow,
            Strategy::SlidingWindow(_) => PolicyKind::SlidingWindow,
            Strategy::TokenBucket(_) => PolicyKind::TokenBucket,
        }
    }

    /// Whether this policy keeps state between calls.
    pub fn is_stateful(&self) -> bool {
        !matches!(self, Strategy::NoLimit(_))
    }

    /// Apply the policy to `state` for a request of `tokens` at `now`.
    ///
    /// State stored by a different policy (e.g. after a configuration
    /// change) is discarded and the limiter starts fresh.
    pub fn decide(
        &self,
        state: Option<&LimiterState>,
        now: DateTime<Utc>,
        tokens: u64,
    ) -> Decision<Option<LimiterState>> {
        if let Some(state) = state {
            if state.policy_name() != self.kind().as_str() {
                debug!(
                    stored = state.policy_name(),
                    policy = %self.kind(),
                    "Discarding state stored by another policy"
                );
            }
        }

        let secs = to_secs(now);
        match self {
            Strategy::NoLimit(policy) => Decision {
                rate_limit: policy.decide(now),
                state: None,
                ttl: None,
            },
            Strategy::FixedWindow(policy) => {
                let stored = match state {
                    Some(LimiterState::FixedWindow(window)) => Some(window),
                    _ => None,
                };
                let decision = policy.decide(stored, secs, tokens);
                Decision {
                    rate_limit: decision.rate_limit,
                    state: Some(LimiterState::FixedWindow(decision.state)),
                    ttl: decision.ttl,
                }
            }
            Strategy::SlidingWindow(policy) => {
                let stored = match state {
                    Some(LimiterState::SlidingWindow(window)) => Some(window),
                    _ => None,
                };
                let decision = policy.decide(stored, secs, tokens);
                Decision {
                    rate_limit: decision.rate_limit,
                    state: Some(LimiterState::SlidingWindow(decision.state)),
                    ttl: decision.ttl,
                }
            }
            Strategy::TokenBucket(policy) => {
                let stored = match state {
                    Some(LimiterState::TokenBucket(bucket)) => Some(bucket),
                    _ => None,
                };
                let decision = policy.decide(stored, secs, tokens);
                Decision {
                    rate_limit: decision.rate_limit,
                    state: Some(LimiterState::TokenBucket(decision.state)),
                    ttl: decision.ttl,
                }
            }
        }
    }
}
