//! Persisted per-limiter state.

use serde::{Deserialize, Serialize};

/// State of a fixed window counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    /// Epoch seconds at which the current window opened
    pub window_start: f64,
    /// Tokens consumed in the current window
    pub hits: u64,
}

impl WindowState {
    pub(crate) fn open(now: f64) -> Self {
        Self {
            window_start: now,
            hits: 0,
        }
    }
}

/// State of a sliding window counter: the current window and the one
/// immediately before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlidingWindowState {
    /// Epoch seconds at which the current window opened
    pub window_start: f64,
    pub hits_in_current_window: u64,
    pub hits_in_previous_window: u64,
}

impl SlidingWindowState {
    pub(crate) fn open(now: f64) -> Self {
        Self {
            window_start: now,
            hits_in_current_window: 0,
            hits_in_previous_window: 0,
        }
    }
}

/// State of a token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Tokens left, always within `[0, capacity]`
    pub available_tokens: f64,
    /// Epoch seconds of the last refill computation
    pub last_refill_at: f64,
}

impl BucketState {
    pub(crate) fn full(capacity: f64, now: f64) -> Self {
        Self {
            available_tokens: capacity,
            last_refill_at: now,
        }
    }
}

/// The stored state for one limiter id.
///
/// The `no_limit` policy is stateless and has no variant here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LimiterState {
    FixedWindow(WindowState),
    SlidingWindow(SlidingWindowState),
    TokenBucket(BucketState),
}

impl LimiterState {
    /// Name of the policy this state belongs to.
    pub fn policy_name(&self) -> &'static str {
        match self {
            LimiterState::FixedWindow(_) => "fixed_window",
            LimiterState::SlidingWindow(_) => "sliding_window",
            LimiterState::TokenBucket(_) => "token_bucket",
        }
    }
}
