//! # Retry Policy
//!
//! Pure decision function for a failed attempt: retry after an exponential
//! backoff, or fail terminally. The worker applies the decision; the policy
//! never touches the store, a channel or a timer.

use std::time::Duration;

use crate::config::BackoffConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Return the task to PENDING and re-enqueue it after `delay`
    Retry {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Fail the task and write its dead-letter record
    Terminal { attempt: u32, error: String },
}

impl RetryDecision {
    pub fn attempt(&self) -> u32 {
        match self {
            Self::Retry { attempt, .. } | Self::Terminal { attempt, .. } => *attempt,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    /// `min(cap, base * 2^attempt)`, saturating instead of overflowing
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Decide what happens after a failure, where `attempt_count` is the
    /// number of failures recorded before this one.
    pub fn decide(&self, attempt_count: u32, max_attempts: u32, error: impl Into<String>) -> RetryDecision {
        let attempt = attempt_count.saturating_add(1);
        let error = error.into();
        if attempt < max_attempts {
            RetryDecision::Retry {
                attempt,
                delay: self.backoff_delay(attempt),
                error,
            }
        } else {
            RetryDecision::Terminal { attempt, error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(32));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(60));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_decide_retries_until_budget_is_spent() {
        let policy = policy();
        assert_eq!(
            policy.decide(0, 3, "boom"),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(2),
                error: "boom".to_string()
            }
        );
        assert!(!policy.decide(1, 3, "boom").is_terminal());
        assert_eq!(
            policy.decide(2, 3, "boom"),
            RetryDecision::Terminal {
                attempt: 3,
                error: "boom".to_string()
            }
        );
    }

    #[test]
    fn test_single_attempt_budget_is_terminal_immediately() {
        let decision = policy().decide(0, 1, "nope");
        assert!(decision.is_terminal());
        assert_eq!(decision.attempt(), 1);
    }

    #[test]
    fn test_cap_never_below_base() {
        let policy = RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(10));
    }
}
