//! Outcome classification and retry policy
//!
//! Maps a failed attempt to a [`RetryDecision`]: either retry after an
//! exponential backoff delay, or give up with a terminal [`ErrorKind`].
//!
//! Retryable: transport failures, 5xx, and explicit 429 rate limiting.
//! Never retried: other 4xx (the request itself is wrong, sending it again
//! cannot help), per-request timeouts (the executor finalizes those before
//! classification), and malformed event streams (a backend bug).

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, MedirError, Result};

/// What to do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Try again after the given delay
    Retry {
        /// Backoff delay before re-admission
        after: Duration,
    },
    /// Finalize the logical request as failed
    GiveUp(ErrorKind),
}

/// Exponential backoff retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per logical request, including the first
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound on any computed delay
    pub max_backoff: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1)`; each delay is scaled by a uniform
    /// factor in `1 ± jitter`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable retries entirely
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the first)
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first retry
    #[must_use]
    pub fn with_initial_backoff(mut self, initial: Duration) -> Self {
        self.initial_backoff = initial;
        self
    }

    /// Set the backoff ceiling
    #[must_use]
    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Set the growth multiplier
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validate field ranges
    ///
    /// # Errors
    ///
    /// Returns `MedirError::InvalidConfig` when a field is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(MedirError::InvalidConfig {
                message: "retry.max_attempts must be at least 1".to_string(),
            });
        }
        if self.multiplier < 1.0 {
            return Err(MedirError::InvalidConfig {
                message: format!("retry.multiplier must be >= 1.0, got {}", self.multiplier),
            });
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(MedirError::InvalidConfig {
                message: format!("retry.jitter must be in [0, 1), got {}", self.jitter),
            });
        }
        Ok(())
    }

    /// Backoff delay for the retry following `attempt` (0-based), before jitter
    #[must_use]
    pub fn base_delay(&self, attempt: usize) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.initial_backoff.mul_f64(factor);
        delay.min(self.max_backoff)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter == 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        delay.mul_f64(factor)
    }

    /// Classify a failed attempt
    ///
    /// `attempt` is the 0-based index of the attempt that just failed.
    #[must_use]
    pub fn classify(&self, error: &MedirError, attempt: usize) -> RetryDecision {
        let kind = error.kind();
        let retryable = matches!(
            kind,
            ErrorKind::Transport | ErrorKind::Server | ErrorKind::RateLimited
        );
        if !retryable {
            return RetryDecision::GiveUp(kind);
        }
        if attempt + 1 >= self.max_attempts {
            return RetryDecision::GiveUp(ErrorKind::RetriesExhausted);
        }
        // A server-suggested Retry-After wins over the computed schedule;
        // retrying earlier than the endpoint asked for just burns an attempt.
        let delay = match error {
            MedirError::RateLimited {
                retry_after: Some(after),
            } => (*after).max(self.base_delay(attempt)),
            _ => self.base_delay(attempt),
        };
        RetryDecision::Retry {
            after: self.jittered(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_no_jitter() {
        let policy = RetryPolicy::new()
            .with_max_attempts(4)
            .with_initial_backoff(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_jitter(0.0);

        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1), Duration::from_millis(200));
        assert_eq!(policy.base_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_initial_backoff(Duration::from_secs(1))
            .with_max_backoff(Duration::from_secs(3))
            .with_multiplier(10.0);

        assert_eq!(policy.base_delay(5), Duration::from_secs(3));
    }

    #[test]
    fn test_server_errors_retry_until_exhausted() {
        let policy = RetryPolicy::new().with_max_attempts(3).with_jitter(0.0);
        let err = MedirError::Server { status: 503 };

        assert_eq!(
            policy.classify(&err, 0),
            RetryDecision::Retry {
                after: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.classify(&err, 1),
            RetryDecision::Retry {
                after: Duration::from_millis(200)
            }
        );
        assert_eq!(
            policy.classify(&err, 2),
            RetryDecision::GiveUp(ErrorKind::RetriesExhausted)
        );
    }

    #[test]
    fn test_client_errors_never_retry() {
        let policy = RetryPolicy::new().with_max_attempts(10);
        let err = MedirError::Client { status: 401 };
        assert_eq!(policy.classify(&err, 0), RetryDecision::GiveUp(ErrorKind::Client));
    }

    #[test]
    fn test_malformed_order_never_retries() {
        let policy = RetryPolicy::new();
        let err = MedirError::MalformedEventOrder {
            detail: "Token after Completed".to_string(),
        };
        assert_eq!(
            policy.classify(&err, 0),
            RetryDecision::GiveUp(ErrorKind::MalformedEventOrder)
        );
    }

    #[test]
    fn test_retry_after_hint_respected() {
        let policy = RetryPolicy::new().with_jitter(0.0);
        let err = MedirError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(
            policy.classify(&err, 0),
            RetryDecision::Retry {
                after: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new()
            .with_initial_backoff(Duration::from_millis(100))
            .with_jitter(0.5);
        let err = MedirError::transport("reset");
        for _ in 0..200 {
            match policy.classify(&err, 0) {
                RetryDecision::Retry { after } => {
                    assert!(after >= Duration::from_millis(50));
                    assert!(after <= Duration::from_millis(150));
                }
                RetryDecision::GiveUp(_) => panic!("transport at attempt 0 must retry"),
            }
        }
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        assert!(RetryPolicy::new().with_max_attempts(0).validate().is_err());
        assert!(RetryPolicy::new().with_multiplier(0.5).validate().is_err());
        assert!(RetryPolicy::new().with_jitter(1.0).validate().is_err());
        assert!(RetryPolicy::new().validate().is_ok());
    }
}
