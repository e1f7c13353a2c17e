//! Sliding window counter.
//!
//! Keeps the hit count of the current window and of the one right before it.
//! The previous window's hits are weighted by how much of it still overlaps
//! a window of `interval` ending now:
//!
//! ```text
//! count = current + previous * (1 - elapsed_in_current / interval)
//! ```

use std::time::Duration;

use crate::clock::{from_secs, secs_to_duration};

use super::rate_limit::{RateLimit, NEVER_RETRY};
use super::state::SlidingWindowState;
use super::strategy::Decision;

#[derive(Debug, Clone, PartialEq)]
pub struct SlidingWindow {
    limit: u64,
    interval: f64,
}

impl SlidingWindow {
    pub fn new(limit: u64, interval: Duration) -> Self {
        Self {
            limit,
            interval: interval.as_secs_f64(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Bring the stored windows up to date with `now`.
    fn roll(&self, state: Option<&SlidingWindowState>, now: f64) -> SlidingWindowState {
        let Some(state) = state else {
            return SlidingWindowState::open(now);
        };

        let elapsed = now - state.window_start;
        if elapsed >= 2.0 * self.interval {
            // Both windows are out of reach.
            SlidingWindowState::open(now)
        } else if elapsed >= self.interval {
            SlidingWindowState {
                window_start: state.window_start + self.interval,
                hits_in_current_window: 0,
                hits_in_previous_window: state.hits_in_current_window,
            }
        } else {
            state.clone()
        }
    }

    /// Weighted hit count, floored to whole tokens.
    fn hit_count(&self, window: &SlidingWindowState, now: f64) -> u64 {
        let fraction = ((now - window.window_start) / self.interval).clamp(0.0, 1.0);
        let weighted = window.hits_in_previous_window as f64 * (1.0 - fraction);
        window.hits_in_current_window.saturating_add(weighted.floor() as u64)
    }

    /// Seconds from `now` until `tokens` more would be admitted.
    fn wait_for(&self, window: &SlidingWindowState, now: f64, tokens: u64) -> Duration {
        if tokens > self.limit {
            return NEVER_RETRY;
        }

        let current = window.hits_in_current_window;
        let previous = window.hits_in_previous_window;
        let fits_current = current.checked_add(tokens).filter(|&sum| sum <= self.limit);
        let ready_at = match fits_current {
            Some(sum) if previous > 0 => {
                // The previous window has to decay until the leftover room fits.
                let room = (self.limit - sum) as f64;
                let fraction = 1.0 - room / previous as f64;
                window.window_start + fraction * self.interval
            }
            _ => {
                // Wait for the current window to become the previous one and decay.
                let window_end = window.window_start + self.interval;
                let fraction = if current == 0 {
                    0.0
                } else {
                    1.0 - (self.limit - tokens) as f64 / current as f64
                };
                window_end + fraction.max(0.0) * self.interval
            }
        };

        secs_to_duration(ready_at - now)
    }

    /// When no hit is counted any more.
    fn reset_at(&self, window: &SlidingWindowState, now: f64) -> f64 {
        if window.hits_in_current_window > 0 {
            window.window_start + 2.0 * self.interval
        } else if window.hits_in_previous_window > 0 {
            window.window_start + self.interval
        } else {
            now
        }
    }

    /// Decide on a request for `tokens` at `now` (epoch seconds).
    pub fn decide(
        &self,
        state: Option<&SlidingWindowState>,
        now: f64,
        tokens: u64,
    ) -> Decision<SlidingWindowState> {
        let mut window = self.roll(state, now);
        let count = self.hit_count(&window, now);

        let admitted = count.checked_add(tokens).filter(|&total| total <= self.limit);
        let rate_limit = if let Some(total) = admitted {
            window.hits_in_current_window += tokens;
            RateLimit::accepted(
                self.limit,
                self.limit - total,
                from_secs(self.reset_at(&window, now)),
            )
        } else {
            RateLimit::rejected(
                self.limit,
                self.wait_for(&window, now, tokens),
                from_secs(self.reset_at(&window, now)),
            )
        };

        let ttl = Some(secs_to_duration(window.window_start + 2.0 * self.interval - now));

        Decision {
            rate_limit,
            state: window,
            ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> SlidingWindow {
        SlidingWindow::new(10, Duration::from_secs(60))
    }

    fn state(window_start: f64, current: u64, previous: u64) -> SlidingWindowState {
        SlidingWindowState {
            window_start,
            hits_in_current_window: current,
            hits_in_previous_window: previous,
        }
    }

    #[test]
    fn test_counts_within_first_window() {
        let decision = limiter().decide(None, 0.0, 10);
        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.rate_limit.remaining_tokens(), 0);

        let decision = limiter().decide(Some(&decision.state), 30.0, 1);
        assert!(!decision.rate_limit.is_accepted());
        assert_eq!(decision.rate_limit.retry_after(), Some(Duration::from_secs(36)));
    }

    #[test]
    fn test_previous_window_decays() {
        let full = state(0.0, 10, 0);

        // At t=90 the previous window counts for half: 10 * 0.5 + 5 = 10.
        let decision = limiter().decide(Some(&full), 90.0, 5);
        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.state, state(60.0, 5, 10));
        assert_eq!(decision.rate_limit.remaining_tokens(), 0);

        let decision = limiter().decide(Some(&decision.state), 90.0, 1);
        assert!(!decision.rate_limit.is_accepted());
        assert_eq!(decision.state, state(60.0, 5, 10));
    }

    #[test]
    fn test_retry_after_waits_for_decay() {
        // 5 + 10 * 0.5 = 10, one more needs the previous weight to reach 4.
        let decision = limiter().decide(Some(&state(60.0, 5, 10)), 90.0, 1);

        assert_eq!(decision.rate_limit.retry_after(), Some(Duration::from_secs(6)));

        let later = limiter().decide(Some(&decision.state), 96.0, 1);
        assert!(later.rate_limit.is_accepted());
    }

    #[test]
    fn test_gap_of_two_intervals_resets() {
        let decision = limiter().decide(Some(&state(0.0, 10, 7)), 125.0, 1);

        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.state, state(125.0, 1, 0));
        assert_eq!(decision.rate_limit.remaining_tokens(), 9);
    }

    #[test]
    fn test_request_above_limit_is_never_satisfiable() {
        let decision = limiter().decide(None, 0.0, 11);

        assert!(decision.rate_limit.is_unsatisfiable());
        assert_eq!(decision.state, state(0.0, 0, 0));
    }

    #[test]
    fn test_zero_tokens_keeps_counts() {
        let current = state(60.0, 5, 10);
        let decision = limiter().decide(Some(&current), 90.0, 0);

        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.state, current);
        assert_eq!(decision.rate_limit.remaining_tokens(), 0);
    }

    #[test]
    fn test_limits_near_u64_max_do_not_overflow() {
        let limiter = SlidingWindow::new(u64::MAX, Duration::from_secs(60));
        let window = state(60.0, u64::MAX - 1, 4);

        let decision = limiter.decide(Some(&window), 90.0, u64::MAX);
        assert!(!decision.rate_limit.is_accepted());
        assert_eq!(decision.state, window);

        let decision = limiter.decide(Some(&state(60.0, u64::MAX - 1, 0)), 90.0, 1);
        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.rate_limit.remaining_tokens(), 0);
        assert_eq!(decision.state.hits_in_current_window, u64::MAX);
    }

    #[test]
    fn test_ttl_covers_next_window() {
        let decision = limiter().decide(None, 0.0, 1);
        assert_eq!(decision.ttl, Some(Duration::from_secs(120)));
    }
}
