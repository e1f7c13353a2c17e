//! Several limits applied to the same request.

use crate::error::{RateLimiterError, Result};

use super::limiter::Limiter;
use super::rate_limit::RateLimit;

/// Applies every member limiter to each request and reports the most
/// restrictive decision, e.g. "10 per second and 1000 per day".
///
/// Members are consumed in order and independently: a rejection by one
/// member does not roll back tokens taken from the others.
#[derive(Debug)]
pub struct CompoundLimiter {
    limiters: Vec<Limiter>,
}

impl CompoundLimiter {
    pub fn new(limiters: Vec<Limiter>) -> Result<Self> {
        if limiters.is_empty() {
            return Err(RateLimiterError::Config(
                "a compound limiter needs at least one limiter".to_string(),
            ));
        }
        Ok(Self { limiters })
    }

    pub fn limiters(&self) -> &[Limiter] {
        &self.limiters
    }

    pub fn consume(&self, tokens: i64) -> Result<RateLimit> {
        self.fold(|limiter| limiter.consume(tokens))
    }

    pub fn peek(&self) -> Result<RateLimit> {
        self.fold(Limiter::peek)
    }

    pub fn reset(&self) -> Result<()> {
        for limiter in &self.limiters {
            limiter.reset()?;
        }
        Ok(())
    }

    fn fold<F>(&self, mut check: F) -> Result<RateLimit>
    where
        F: FnMut(&Limiter) -> Result<RateLimit>,
    {
        let mut most_restrictive: Option<RateLimit> = None;
        for limiter in &self.limiters {
            let decision = check(limiter)?;
            most_restrictive = Some(match most_restrictive {
                Some(current) => current.most_restrictive(decision),
                None => decision,
            });
        }
        most_restrictive
            .ok_or_else(|| RateLimiterError::Config("empty compound limiter".to_string()))
    }
}
