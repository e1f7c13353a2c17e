//! Ratekeeper - Rate Limiting Core
//!
//! This crate implements named rate limiters with fixed window, sliding
//! window, token bucket and no-limit policies. Limiter state lives in a
//! pluggable [`storage::Storage`]; an optional [`lock::LockFactory`]
//! serializes the read-modify-write cycle of each limiter id.
//!
//! Limiters are built by a [`ratelimit::RateLimiterFactory`], either
//! directly from [`ratelimit::LimiterConfig`] values or from a settings file
//! through [`config::RateLimiterSettings`].

pub mod clock;
pub mod config;
pub mod error;
pub mod lock;
pub mod ratelimit;
pub mod storage;
