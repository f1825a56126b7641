use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::build_error::BuildError;
use crate::cancellation::CancellationToken;
use crate::category::ErrorCategory;

/// Wait-time parameters for one retry loop (`spec.md` §4.A). Wait before
/// attempt *n* ≥ 1 is `min(max, initial·multiplier^(n-1))`, optionally plus
/// uniform additive jitter up to 25% of the base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(
        deserialize_with = "ossb_duration::deserialize_duration",
        serialize_with = "ossb_duration::serialize_duration"
    )]
    pub initial: Duration,
    #[serde(
        deserialize_with = "ossb_duration::deserialize_duration",
        serialize_with = "ossb_duration::serialize_duration"
    )]
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub retryable_categories: BTreeSet<ErrorCategory>,
}

impl RetryConfig {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(32);
        let base_secs = self.initial.as_secs_f64() * self.multiplier.powi(pow as i32);
        let capped_secs = base_secs.min(self.max.as_secs_f64());
        let base = Duration::from_secs_f64(capped_secs.max(0.0));
        if self.jitter {
            apply_jitter(base)
        } else {
            base
        }
    }
}

fn apply_jitter(base: Duration) -> Duration {
    let extra_fraction = rand::random::<f64>() * 0.25;
    let extra_millis = (base.as_millis() as f64 * extra_fraction).round() as u64;
    base + Duration::from_millis(extra_millis)
}

/// Three named policies ship (`spec.md` §4.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    Conservative,
    Default,
    Aggressive,
}

impl RetryPolicy {
    pub fn to_config(self) -> RetryConfig {
        let retryable_categories = [
            ErrorCategory::Network,
            ErrorCategory::Registry,
            ErrorCategory::Resource,
            ErrorCategory::Cache,
            ErrorCategory::Timeout,
        ]
        .into_iter()
        .collect();

        match self {
            RetryPolicy::Conservative => RetryConfig {
                max_retries: 2,
                initial: Duration::from_secs(2),
                max: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: false,
                retryable_categories,
            },
            RetryPolicy::Default => RetryConfig {
                max_retries: 3,
                initial: Duration::from_secs(1),
                max: Duration::from_secs(60),
                multiplier: 2.0,
                jitter: true,
                retryable_categories,
            },
            RetryPolicy::Aggressive => RetryConfig {
                max_retries: 5,
                initial: Duration::from_millis(500),
                max: Duration::from_secs(60),
                multiplier: 2.0,
                jitter: true,
                retryable_categories,
            },
        }
    }
}

/// Closed keyword set for errors that arrive uncategorized (`spec.md`
/// §4.A "Retry-by-message fallback").
pub fn is_retryable_by_message(message: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "connection refused",
        "connection reset",
        "timeout",
        "network unreachable",
        "temporary failure",
        "service unavailable",
        "rate limit",
        "throttled",
        "deadline exceeded",
        "i/o timeout",
        "no route to host",
        "gateway timeout",
    ];
    let hay = message.to_lowercase();
    KEYWORDS.iter().any(|k| hay.contains(k))
}

fn is_retryable(err: &BuildError, config: &RetryConfig) -> bool {
    if config.retryable_categories.contains(&err.category) {
        return err.retryable;
    }
    err.retryable || is_retryable_by_message(&err.message)
}

/// `retry(context, policy, operation, thunk)`: runs `thunk` with bounded
/// exponential backoff. Context cancellation is checked before each
/// attempt and during each wait. A non-retryable error aborts immediately.
/// Exhausting retries yields a network-category high-severity error whose
/// cause is the last attempt's error.
pub fn retry<T>(
    token: &CancellationToken,
    config: &RetryConfig,
    operation: &str,
    mut thunk: impl FnMut() -> Result<T, BuildError>,
) -> Result<T, BuildError> {
    let mut attempt = 0u32;
    loop {
        if token.is_cancelled() {
            return Err(BuildError::builder(format!(
                "{operation} cancelled before attempt {attempt}"
            ))
            .category(ErrorCategory::Timeout)
            .operation(operation)
            .cause(token.reason().unwrap_or_default())
            .retryable(false)
            .build());
        }

        attempt += 1;
        match thunk() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err, config) {
                    return Err(err);
                }
                if attempt > config.max_retries {
                    return Err(BuildError::builder(format!(
                        "{operation} failed after {attempt} attempts"
                    ))
                    .category(ErrorCategory::Network)
                    .severity(crate::category::Severity::High)
                    .operation(operation)
                    .cause(err.message.clone())
                    .retryable(false)
                    .build());
                }
                let delay = config.delay_for_attempt(attempt);
                if !token.sleep_cancellable(delay) {
                    return Err(BuildError::builder(format!(
                        "{operation} cancelled during retry backoff"
                    ))
                    .category(ErrorCategory::Timeout)
                    .operation(operation)
                    .cause(token.reason().unwrap_or_default())
                    .retryable(false)
                    .build());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn named_policies_match_spec_numbers() {
        let c = RetryPolicy::Conservative.to_config();
        assert_eq!(c.max_retries, 2);
        assert_eq!(c.initial, Duration::from_secs(2));
        assert!(!c.jitter);

        let d = RetryPolicy::Default.to_config();
        assert_eq!(d.max_retries, 3);
        assert_eq!(d.initial, Duration::from_secs(1));
        assert!(d.jitter);

        let a = RetryPolicy::Aggressive.to_config();
        assert_eq!(a.max_retries, 5);
        assert_eq!(a.initial, Duration::from_millis(500));
        assert!(a.jitter);
    }

    #[test]
    fn delay_follows_exponential_formula_without_jitter() {
        let config = RetryPolicy::Conservative.to_config();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        // attempt 5 would be 32s, capped at 30s
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(30));
    }

    #[test]
    fn successful_retry_invokes_thunk_at_most_max_retries_plus_one() {
        // Scenario S3: flaky registry fails first two, succeeds third.
        let token = CancellationToken::new();
        let mut config = RetryPolicy::Default.to_config();
        config.initial = Duration::from_millis(1);
        config.max = Duration::from_millis(5);
        let calls = Cell::new(0);
        let result = retry(&token, &config, "blob-head", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(BuildError::builder("503 service unavailable")
                    .category(ErrorCategory::Network)
                    .build())
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
        assert!(calls.get() as u32 <= config.max_retries + 1);
    }

    #[test]
    fn non_retryable_error_aborts_immediately() {
        let token = CancellationToken::new();
        let config = RetryPolicy::Default.to_config();
        let calls = Cell::new(0);
        let result: Result<(), BuildError> = retry(&token, &config, "auth", || {
            calls.set(calls.get() + 1);
            Err(BuildError::builder("invalid credentials")
                .category(ErrorCategory::Auth)
                .build())
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn exhausting_retries_yields_network_high_severity_error() {
        let token = CancellationToken::new();
        let mut config = RetryPolicy::Conservative.to_config();
        config.initial = Duration::from_millis(1);
        config.max = Duration::from_millis(2);
        let result: Result<(), BuildError> = retry(&token, &config, "blob-head", || {
            Err(BuildError::builder("connection reset")
                .category(ErrorCategory::Network)
                .build())
        });
        let err = result.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Network);
        assert_eq!(err.severity, crate::category::Severity::High);
    }

    #[test]
    fn cancellation_is_observed_before_next_attempt() {
        let token = CancellationToken::new();
        token.cancel("shutdown");
        let config = RetryPolicy::Default.to_config();
        let result: Result<(), BuildError> = retry(&token, &config, "pull", || Ok(()));
        assert_eq!(result.unwrap_err().category, ErrorCategory::Timeout);
    }

    #[test]
    fn retry_by_message_keyword_fallback() {
        assert!(is_retryable_by_message("request failed: connection reset by peer"));
        assert!(is_retryable_by_message("upstream gateway timeout"));
        assert!(!is_retryable_by_message("invalid repository name"));
    }
}
