//! Resilience: retry policy for calls to unreliable remote providers
//!
//! Pure delay arithmetic; the async controller that sleeps and re-issues
//! calls lives in the agent crate.
//!
//! # Design
//!
//! ```text
//! attempt 1 ── fail ── sleep delay(1) ── attempt 2 ── fail ── sleep delay(2) ── attempt 3
//!
//! exponential: delay(k) = initial_delay * multiplier^(k-1)
//! fixed:       delay(k) = initial_delay
//! ```
//!
//! With the defaults (3 attempts, 1s, x2) the schedule is 1s, 2s.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on any single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    #[default]
    Exponential,
    Fixed,
}

impl fmt::Display for BackoffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential => write!(f, "exponential"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Bounded retry policy for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub attempts: u32,
    pub backoff: BackoffType,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: BackoffType::Exponential,
            initial_delay: Duration::from_secs_f64(DEFAULT_INITIAL_DELAY_SECS),
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn exponential(attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: BackoffType::Exponential,
            initial_delay,
            multiplier,
        }
    }

    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff: BackoffType::Fixed,
            initial_delay: delay,
            multiplier: 1.0,
        }
    }

    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay before retry `k` (k = 1 is the sleep before the second attempt).
    pub fn delay_before_retry(&self, k: u32) -> Duration {
        match self.backoff {
            BackoffType::Fixed => self.initial_delay.min(MAX_BACKOFF),
            BackoffType::Exponential => {
                let exp = k.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
                Duration::try_from_secs_f64(secs)
                    .map(|d| d.min(MAX_BACKOFF))
                    .unwrap_or(MAX_BACKOFF)
            }
        }
    }

    /// Every sleep the policy would take if all attempts fail.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.attempts.max(1))
            .map(|k| self.delay_before_retry(k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(
            policy.schedule(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_exponential_growth() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(500), 3.0);
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1500),
                Duration::from_millis(4500),
                Duration::from_millis(13500),
            ]
        );
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(4, Duration::from_secs(2));
        assert!(policy.schedule().iter().all(|d| *d == Duration::from_secs(2)));
        assert_eq!(policy.schedule().len(), 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::exponential(100, Duration::from_secs(1), 10.0);
        assert_eq!(policy.delay_before_retry(50), MAX_BACKOFF);
        let huge = RetryPolicy::exponential(2, Duration::from_secs(1), f64::MAX);
        assert_eq!(huge.delay_before_retry(3), MAX_BACKOFF);
    }

    #[test]
    fn test_single_attempt_has_no_sleeps() {
        let policy = RetryPolicy::single_attempt();
        assert_eq!(policy.attempts, 1);
        assert!(policy.schedule().is_empty());
    }

    #[test]
    fn test_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::exponential(0, Duration::ZERO, 2.0).attempts, 1);
    }

    #[test]
    fn test_backoff_type_serde() {
        let parsed: BackoffType = serde_json::from_str("\"fixed\"").unwrap();
        assert_eq!(parsed, BackoffType::Fixed);
        assert_eq!(BackoffType::Exponential.to_string(), "exponential");
    }
}
