//! Retry scheduling for failed attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens to a job after an attempt finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Exit code zero.
    Complete,
    /// Failed with attempts to spare; eligible again after `delay`.
    Retry { delay: Duration },
    /// Failed at the retry ceiling.
    Dead,
}

/// Exponential backoff: `delay(attempts) = base_seconds ^ attempts`.
///
/// `attempts` counts the attempt that just failed, so with a base of 2 the
/// first retry waits 2s, the second 4s, the third 8s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_seconds: f64,
    /// Optional ceiling on a single delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
}

impl BackoffPolicy {
    pub fn new(base_seconds: f64) -> Self {
        Self {
            base_seconds,
            max_delay: None,
        }
    }

    /// Cap every delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Delay before the next attempt after `attempts` attempts.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let secs = self.base_seconds.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Decide the next state for a job that has now made `attempts` attempts.
    pub fn decide(&self, attempts: u32, max_retries: u32, exit_code: i32) -> RetryDecision {
        if exit_code == 0 {
            RetryDecision::Complete
        } else if attempts < max_retries {
            RetryDecision::Retry {
                delay: self.delay(attempts),
            }
        } else {
            RetryDecision::Dead
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_base_to_the_attempts() {
        let policy = BackoffPolicy::new(2.0);
        let delays: Vec<_> = (1..=3).map(|a| policy.delay(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert_eq!(BackoffPolicy::new(3.0).delay(2), Duration::from_secs(9));
    }

    #[test]
    fn fractional_bases_are_allowed() {
        let policy = BackoffPolicy::new(0.5);
        assert_eq!(policy.delay(1), Duration::from_millis(500));
    }

    #[test]
    fn ceiling_caps_large_delays() {
        let policy = BackoffPolicy::new(2.0).with_max_delay(Duration::from_secs(60));
        assert_eq!(policy.delay(5), Duration::from_secs(32));
        assert_eq!(policy.delay(6), Duration::from_secs(60));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn decision_follows_exit_code_and_ceiling() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.decide(1, 3, 0), RetryDecision::Complete);
        assert_eq!(policy.decide(3, 3, 0), RetryDecision::Complete);
        assert_eq!(
            policy.decide(2, 3, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(policy.decide(3, 3, 127), RetryDecision::Dead);
        assert_eq!(policy.decide(1, 1, -1), RetryDecision::Dead);
    }
}
