//! Rate limiting policies, limiters and their construction.

mod compound;
mod factory;
mod fixed_window;
mod limiter;
mod no_limit;
mod policy;
mod rate_limit;
mod sliding_window;
pub(crate) mod state;
mod strategy;
mod token_bucket;

pub use compound::CompoundLimiter;
pub use factory::{LimiterDefinition, RateLimiterFactory};
pub use fixed_window::FixedWindow;
pub use limiter::{Limiter, DEFAULT_LOCK_TIMEOUT};
pub use no_limit::NoLimit;
pub use policy::{LimiterConfig, PolicyKind, Rate};
pub use rate_limit::{RateLimit, NEVER_RETRY};
pub use sliding_window::SlidingWindow;
pub use state::{BucketState, LimiterState, SlidingWindowState, WindowState};
pub use strategy::{Decision, Strategy};
pub use token_bucket::TokenBucket;
