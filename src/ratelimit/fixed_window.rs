//! Fixed window counter.

use std::time::Duration;

use crate::clock::{from_secs, secs_to_duration};

use super::rate_limit::{RateLimit, NEVER_RETRY};
use super::state::WindowState;
use super::strategy::Decision;

/// Counts hits in consecutive windows of `interval`, each opened by the first
/// request after the previous one expired.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedWindow {
    limit: u64,
    interval: f64,
}

impl FixedWindow {
    pub fn new(limit: u64, interval: Duration) -> Self {
        Self {
            limit,
            interval: interval.as_secs_f64(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Decide on a request for `tokens` at `now` (epoch seconds).
    pub fn decide(
        &self,
        state: Option<&WindowState>,
        now: f64,
        tokens: u64,
    ) -> Decision<WindowState> {
        let mut window = match state {
            Some(window) if now - window.window_start < self.interval => window.clone(),
            _ => WindowState::open(now),
        };
        let window_end = window.window_start + self.interval;
        let ttl = Some(secs_to_duration(window_end - now));

        let admitted = window.hits.checked_add(tokens).filter(|&hits| hits <= self.limit);
        let rate_limit = if let Some(hits) = admitted {
            window.hits = hits;
            let reset_at = if window.hits == 0 { now } else { window_end };
            RateLimit::accepted(self.limit, self.limit - window.hits, from_secs(reset_at))
        } else {
            let retry_after = if tokens > self.limit {
                NEVER_RETRY
            } else {
                secs_to_duration(window_end - now)
            };
            RateLimit::rejected(self.limit, retry_after, from_secs(window_end))
        };

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

    fn window() -> FixedWindow {
        FixedWindow::new(5, Duration::from_secs(10))
    }

    #[test]
    fn test_first_request_opens_window() {
        let decision = window().decide(None, 100.0, 2);

        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.rate_limit.remaining_tokens(), 3);
        assert_eq!(decision.state, WindowState { window_start: 100.0, hits: 2 });
        assert_eq!(decision.ttl, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_rejects_when_full() {
        let state = WindowState { window_start: 100.0, hits: 5 };
        let decision = window().decide(Some(&state), 104.0, 1);

        assert!(!decision.rate_limit.is_accepted());
        assert_eq!(decision.rate_limit.remaining_tokens(), 0);
        assert_eq!(decision.rate_limit.retry_after(), Some(Duration::from_secs(6)));
        assert_eq!(decision.state, state);
    }

    #[test]
    fn test_hits_near_u64_max_do_not_overflow() {
        let state = WindowState { window_start: 100.0, hits: u64::MAX - 1 };
        let window = FixedWindow::new(u64::MAX, Duration::from_secs(10));

        let decision = window.decide(Some(&state), 104.0, 2);
        assert!(!decision.rate_limit.is_accepted());
        assert_eq!(decision.state, state);

        let decision = window.decide(Some(&state), 104.0, 1);
        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.state.hits, u64::MAX);
    }

    #[test]
    fn test_no_partial_consumption() {
        let state = WindowState { window_start: 100.0, hits: 3 };
        let decision = window().decide(Some(&state), 101.0, 3);

        assert!(!decision.rate_limit.is_accepted());
        assert_eq!(decision.state.hits, 3);
    }

    #[test]
    fn test_window_resets_after_interval() {
        let state = WindowState { window_start: 100.0, hits: 5 };
        let decision = window().decide(Some(&state), 110.0, 1);

        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.state, WindowState { window_start: 110.0, hits: 1 });
    }

    #[test]
    fn test_request_above_limit_is_never_satisfiable() {
        let decision = window().decide(None, 100.0, 6);

        assert!(!decision.rate_limit.is_accepted());
        assert!(decision.rate_limit.is_unsatisfiable());
        assert_eq!(decision.state.hits, 0);
    }

    #[test]
    fn test_zero_tokens_reports_without_counting() {
        let state = WindowState { window_start: 100.0, hits: 5 };
        let decision = window().decide(Some(&state), 101.0, 0);

        assert!(decision.rate_limit.is_accepted());
        assert_eq!(decision.rate_limit.remaining_tokens(), 0);
        assert_eq!(decision.state, state);
    }
}
