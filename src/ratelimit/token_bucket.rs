//! Token bucket.

use std::time::Duration;

use crate::clock::{from_secs, secs_to_duration};

use super::policy::Rate;
use super::rate_limit::{RateLimit, NEVER_RETRY};
use super::state::BucketState;
use super::strategy::Decision;

/// Absorbs rounding noise when comparing float balances with whole tokens.
const TOKEN_EPSILON: f64 = 1e-9;

/// A bucket of `capacity` tokens refilled continuously at `rate`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: u64,
    rate: Rate,
}

impl TokenBucket {
    pub fn new(capacity: u64, rate: Rate) -> Self {
        Self { capacity, rate }
    }

    pub fn limit(&self) -> u64 {
        self.capacity
    }

    fn clamp(&self, tokens: f64) -> f64 {
        tokens.clamp(0.0, self.capacity as f64)
    }

    /// Seconds needed to accumulate `deficit` tokens, if the bucket refills at all.
    fn refill_time(&self, deficit: f64) -> Option<f64> {
        let per_second = self.rate.tokens_per_second();
        if deficit <= 0.0 {
            Some(0.0)
        } else if per_second > 0.0 {
            Some(deficit / per_second)
        } else {
            None
        }
    }

    /// Decide on a request for `tokens` at `now` (epoch seconds).
    pub fn decide(
        &self,
        state: Option<&BucketState>,
        now: f64,
        tokens: u64,
    ) -> Decision<BucketState> {
        let capacity = self.capacity as f64;
        let mut bucket = match state {
            Some(bucket) => bucket.clone(),
            None => BucketState::full(capacity, now),
        };

        let elapsed = (now - bucket.last_refill_at).max(0.0);
        bucket.available_tokens =
            self.clamp(bucket.available_tokens + elapsed * self.rate.tokens_per_second());
        bucket.last_refill_at = bucket.last_refill_at.max(now);

        let requested = tokens as f64;
        let accepted = bucket.available_tokens + TOKEN_EPSILON >= requested;
        if accepted {
            bucket.available_tokens = self.clamp(bucket.available_tokens - requested);
        }

        let until_full = self.refill_time(capacity - bucket.available_tokens);
        let reset_at = match until_full {
            Some(secs) => from_secs(now + secs),
            None => from_secs(now) + chrono::TimeDelta::seconds(NEVER_RETRY.as_secs() as i64),
        };

        let rate_limit = if accepted {
            let remaining = (bucket.available_tokens + TOKEN_EPSILON).floor() as u64;
            RateLimit::accepted(self.capacity, remaining.min(self.capacity), reset_at)
        } else {
            let retry_after = if tokens > self.capacity {
                NEVER_RETRY
            } else {
                self.refill_time(requested - bucket.available_tokens)
                    .map(secs_to_duration)
                    .unwrap_or(NEVER_RETRY)
            };
            RateLimit::rejected(self.capacity, retry_after, reset_at)
        };

        Decision {
            rate_limit,
            state: bucket,
            ttl: until_full.map(secs_to_duration),
        }
    }
}
