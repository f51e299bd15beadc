// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Retry Policy
 * One strategy object reused at every browser I/O site
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::errors::{ValidatorError, ValidatorResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Operation classes that may be individually opted into retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryOperation {
    Navigation,
    Submission,
    Input,
}

impl RetryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOperation::Navigation => "navigation",
            RetryOperation::Submission => "submission",
            RetryOperation::Input => "input",
        }
    }
}

/// Retry strategy: max attempts, base delay, exponential flag, and the
/// allowlist of operation classes the policy applies to. The error-class
/// predicate lives on `ValidatorError::is_retryable`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    #[serde(rename = "delay")]
    pub delay_ms: u64,
    pub exponential_backoff: bool,
    pub operations: Vec<RetryOperation>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            delay_ms: 500,
            exponential_backoff: true,
            operations: vec![
                RetryOperation::Navigation,
                RetryOperation::Submission,
                RetryOperation::Input,
            ],
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn enabled_for(&self, op: RetryOperation) -> bool {
        self.enabled && self.operations.contains(&op)
    }

    /// Backoff for a given attempt: D, 2D, 4D ... when exponential,
    /// otherwise a constant D. Attempt numbering starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }
        let base = self.delay_ms;
        let ms = if self.exponential_backoff {
            base.saturating_mul(1u64 << (attempt - 1).min(16))
        } else {
            base
        };
        Duration::from_millis(ms)
    }
}

/// Run `operation` under the policy for the given operation class. When the
/// class is not in the allowlist (or retries are disabled) the operation
/// runs exactly once. The default predicate vetoes retries for error
/// classes that cannot succeed on a second try.
pub async fn retry_operation<F, Fut, T>(
    policy: &RetryPolicy,
    op: RetryOperation,
    operation_name: &str,
    mut operation: F,
) -> ValidatorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ValidatorResult<T>>,
{
    let max_attempts = if policy.enabled_for(op) {
        policy.max_attempts.max(1)
    } else {
        1
    };

    let mut attempt = 0;
    let mut last_error: Option<ValidatorError> = None;

    while attempt < max_attempts {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        attempt = attempt,
                        operation = operation_name,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let retryable = err.is_retryable();

                debug!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    operation = operation_name,
                    error = %err,
                    retryable = retryable,
                    "Operation failed"
                );

                if !retryable {
                    return Err(err);
                }

                last_error = Some(err);

                if attempt < max_attempts {
                    let backoff = policy.backoff(attempt);
                    debug!(
                        attempt = attempt,
                        backoff_ms = backoff.as_millis(),
                        operation = operation_name,
                        "Backing off before retry"
                    );
                    tokio::time::sleep(backoff).await;
                } else {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        "Max retry attempts reached"
                    );
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ValidatorError::General(format!(
            "Operation '{}' failed after {} attempts",
            operation_name, max_attempts
        ))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_attempts: 3,
            delay_ms: 1,
            exponential_backoff: true,
            operations: vec![RetryOperation::Navigation, RetryOperation::Input],
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            enabled: true,
            max_attempts: 5,
            delay_ms: 100,
            exponential_backoff: true,
            operations: vec![],
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_constant_without_exponential() {
        let p = RetryPolicy {
            exponential_backoff: false,
            delay_ms: 250,
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff(1), Duration::from_millis(250));
        assert_eq!(p.backoff(4), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result: ValidatorResult<&str> =
            retry_operation(&policy(), RetryOperation::Navigation, "navigate", || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ValidatorError::Timeout {
                            duration: Duration::from_millis(1),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_operation_outside_allowlist_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result: ValidatorResult<()> =
            retry_operation(&policy(), RetryOperation::Submission, "submit", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ValidatorError::Timeout {
                        duration: Duration::from_millis(1),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let result: ValidatorResult<()> =
            retry_operation(&policy(), RetryOperation::Input, "fill", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ValidatorError::Configuration("bad".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
