//! Reconnect backoff (§4.4 "Retry strategy") and the `reconnect_on_error`
//! predicate.

use std::time::Duration;
use tokio_retry2::strategy::{jitter_range, ExponentialBackoff};

pub(crate) const EXPONENT_BASE: u32 = 2;
pub(crate) const FACTOR: u32 = 100;
pub(crate) const DEFAULT_JITTER_PERCENT: u32 = 20;

/// A pluggable `(attempt) -> delay-or-stop` reconnect policy. The spec pins
/// the loose `number | void | null` return type from the teacher's source to
/// a concrete `Option<u64>`: `None` terminates the connection (`end`); `Some(0)`
/// means "reconnect on next tick".
pub type RetryStrategyFn = std::sync::Arc<dyn Fn(u32) -> Option<u64> + Send + Sync>;

/// Default exponential backoff with jitter, bounded by `number_of_retries`.
#[derive(Clone)]
pub struct RetryStrategy {
    exponent_base: u32,
    factor: u32,
    number_of_retries: u32,
    jitter_percent: u32,
}

impl RetryStrategy {
    pub fn new(exponent_base: u32, factor: u32, number_of_retries: u32, jitter_percent: Option<u32>) -> Self {
        RetryStrategy {
            exponent_base: if exponent_base > 0 { exponent_base } else { EXPONENT_BASE },
            factor: if factor > 0 { factor } else { FACTOR },
            number_of_retries,
            jitter_percent: jitter_percent.unwrap_or(DEFAULT_JITTER_PERCENT),
        }
    }

    fn jitter_bounds(&self) -> (f64, f64) {
        let frac = self.jitter_percent as f64 / 100.0;
        (1.0 - frac, 1.0 + frac)
    }

    /// Bounded iterator: yields exactly `number_of_retries` delays, then ends.
    pub fn bounded(&self) -> impl Iterator<Item = Duration> {
        let base = ExponentialBackoff::from_millis(self.exponent_base as u64).factor(self.factor as u64);
        let (lower, upper) = self.jitter_bounds();
        base.map(jitter_range(lower, upper))
            .take(self.number_of_retries as usize)
    }

    /// As a `RetryStrategyFn`: attempts beyond `number_of_retries` return
    /// `None`, ending the connection per §4.4.
    pub fn as_fn(&self) -> RetryStrategyFn {
        let strategy = self.clone();
        std::sync::Arc::new(move |attempt: u32| {
            if attempt == 0 || attempt > strategy.number_of_retries {
                return None;
            }
            strategy.bounded().nth(attempt as usize - 1).map(|d| d.as_millis() as u64)
        })
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::new(EXPONENT_BASE, FACTOR, 5, Some(DEFAULT_JITTER_PERCENT))
    }
}

/// The result of `reconnect_on_error` (§4.4): whether a server error should
/// additionally tear down the connection, and whether the failed command
/// should be resent afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Leave the connection alone; just fail the command.
    Ignore,
    /// Disconnect and fail the command.
    Disconnect,
    /// Disconnect and resend the command once reconnected.
    DisconnectAndResend,
}

pub type ReconnectOnErrorFn =
    std::sync::Arc<dyn Fn(&crate::types::RedisError) -> ReconnectDecision + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_backoff_yields_exactly_n_delays() {
        let s = RetryStrategy::new(2, 100, 5, Some(20));
        assert_eq!(s.bounded().count(), 5);
    }

    #[test]
    fn retry_fn_stops_after_configured_attempts() {
        let s = RetryStrategy::new(2, 100, 3, Some(0));
        let f = s.as_fn();
        assert!(f(1).is_some());
        assert!(f(3).is_some());
        assert!(f(4).is_none());
        assert!(f(0).is_none());
    }

    #[test]
    fn delays_grow_roughly_exponentially() {
        let s = RetryStrategy::new(2, 100, 4, Some(0));
        let delays: Vec<_> = s.bounded().map(|d| d.as_millis()).collect();
        for w in delays.windows(2) {
            assert!(w[1] > w[0]);
        }
    }
}
