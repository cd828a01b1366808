//! Per-segment retry with exponential backoff.
//!
//! A single transient network blip should not abort an otherwise
//! near-complete download, so segment fetches are retried a bounded number
//! of times. Permanent failures (404, malformed URLs, disk errors) abort
//! immediately.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use super::error::FetchError;

/// Default maximum attempts per segment (including the initial attempt).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for the first retry.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(16);

/// Maximum jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a fetch failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed on retry: timeouts, connection errors, 5xx, 408, 429.
    Transient,
    /// Retrying would not help: other 4xx, invalid URLs, disk errors.
    Permanent,
}

/// Decision on whether to retry a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait first.
        delay: Duration,
        /// The attempt number this will be (1-indexed).
        attempt: u32,
    },
    /// Give up.
    DoNotRetry {
        /// Human-readable reason.
        reason: String,
    },
}

/// Bounded exponential backoff policy.
///
/// Delay formula: `min(base * 2^(attempt-1), max) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with a custom attempt limit, clamped to at least one
    /// attempt.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Returns the configured attempt limit.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides whether the attempt that just failed should be retried.
    ///
    /// `attempt` is the 1-indexed number of the attempt that failed.
    #[must_use]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure".to_string(),
            };
        }
        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(1 << exponent);
        let capped = Duration::from_millis(delay_ms).min(self.max_delay);
        let jitter =
            Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64));

        RetryDecision::Retry {
            delay: capped + jitter,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a fetch error for retry decisions.
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::Timeout { .. } | FetchError::Network { .. } => FailureType::Transient,
        FetchError::HttpStatus { status, .. } => match status {
            408 | 429 => FailureType::Transient,
            500..=599 => FailureType::Transient,
            _ => FailureType::Permanent,
        },
        FetchError::Io { .. } | FetchError::InvalidUrl { .. } | FetchError::Body { .. } => {
            FailureType::Permanent
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_with_max_attempts_clamps_to_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
    }

    #[test]
    fn test_permanent_failure_never_retries() {
        let policy = RetryPolicy::default();
        let decision = policy.should_retry(FailureType::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_transient_failure_retries_until_exhausted() {
        let policy = RetryPolicy::with_max_attempts(3);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 3),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_delay_grows_and_respects_cap() {
        let policy = RetryPolicy::with_max_attempts(10);
        let delay_at = |attempt| match policy.should_retry(FailureType::Transient, attempt) {
            RetryDecision::Retry { delay, .. } => delay,
            RetryDecision::DoNotRetry { reason } => panic!("unexpected stop: {reason}"),
        };
        // First retry: ~1s, second: ~2s (both plus up to 500ms jitter).
        assert!(delay_at(1) >= Duration::from_secs(1));
        assert!(delay_at(1) <= Duration::from_millis(1500));
        assert!(delay_at(2) >= Duration::from_secs(2));
        // Far attempts are capped at max delay + jitter.
        assert!(delay_at(9) <= DEFAULT_MAX_DELAY + MAX_JITTER);
    }

    #[test]
    fn test_classify_http_statuses() {
        let transient = [408, 429, 500, 502, 503, 504];
        for status in transient {
            let error = FetchError::http_status("https://example.com", status);
            assert_eq!(classify_error(&error), FailureType::Transient, "{status}");
        }
        let permanent = [400, 403, 404, 410];
        for status in permanent {
            let error = FetchError::http_status("https://example.com", status);
            assert_eq!(classify_error(&error), FailureType::Permanent, "{status}");
        }
    }

    #[test]
    fn test_classify_timeout_transient() {
        let error = FetchError::Timeout {
            url: "https://example.com".to_string(),
        };
        assert_eq!(classify_error(&error), FailureType::Transient);
    }

    #[test]
    fn test_classify_io_permanent() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = FetchError::io("/tmp/x", io);
        assert_eq!(classify_error(&error), FailureType::Permanent);
    }
}
