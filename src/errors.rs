// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Pistin Error Types
 * Production-ready error handling with thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// Error-message classes worth a second attempt at the browser boundary
static RETRYABLE_MESSAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timed?\s*out|timeout|navigation|network|net::|not (visible|stable|found)|no element")
        .expect("retryable-message pattern is valid")
});

/// Main validator error type covering every failure class in the engine
#[derive(Error, Debug)]
pub enum ValidatorError {
    /// Invalid URL, missing selector, unknown browser. Fatal at entry.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Engine not installed, executable missing. Fatal with remediation hint.
    #[error("Environment error: {what} (hint: {remediation})")]
    Environment { what: String, remediation: String },

    /// Navigation to a URL failed
    #[error("Navigation error for {url}: {reason}")]
    Navigation { url: String, reason: String },

    /// Fill/click/press against a selector failed
    #[error("Action '{action}' failed on {selector}: {reason}")]
    Action {
        action: &'static str,
        selector: String,
        reason: String,
    },

    /// Browser-level failures: launch, evaluate, protocol transport
    #[error("Browser error: {0}")]
    Browser(String),

    /// The page or its execution context is gone
    #[error("Page no longer valid: {0}")]
    PageGone(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Effectiveness/cache/session-state I/O failure. Never fatal for a job.
    #[error("Store error: {0}")]
    Store(String),

    /// Declarative login recipe failed. Logged, never fatal.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Job cancellation was requested
    #[error("Cancelled")]
    Cancelled,

    /// General errors
    #[error("Validator error: {0}")]
    General(String),
}

impl ValidatorError {
    /// Default retry predicate: retry only error classes that are transient
    /// at the browser boundary (timeouts, navigation, network, element
    /// visibility/stability/lookup).
    pub fn is_retryable(&self) -> bool {
        match self {
            ValidatorError::Timeout { .. } => true,
            ValidatorError::Navigation { .. } => true,
            ValidatorError::Configuration(_)
            | ValidatorError::Environment { .. }
            | ValidatorError::Cancelled => false,
            other => RETRYABLE_MESSAGE.is_match(&other.to_string()),
        }
    }

    /// True for conditions that abort an entire detection job (unable to
    /// launch, unable to reach the target, unable to instrument the page).
    pub fn is_fatal_for_job(&self) -> bool {
        matches!(
            self,
            ValidatorError::Configuration(_)
                | ValidatorError::Environment { .. }
                | ValidatorError::Cancelled
        )
    }

    pub fn browser<E: std::fmt::Display>(err: E) -> Self {
        ValidatorError::Browser(err.to_string())
    }

    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        ValidatorError::Store(err.to_string())
    }
}

impl From<std::io::Error> for ValidatorError {
    fn from(err: std::io::Error) -> Self {
        ValidatorError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for ValidatorError {
    fn from(err: serde_json::Error) -> Self {
        ValidatorError::Store(format!("serialization: {}", err))
    }
}

impl From<url::ParseError> for ValidatorError {
    fn from(err: url::ParseError) -> Self {
        ValidatorError::Configuration(format!("invalid URL: {}", err))
    }
}

/// Result type for validator operations
pub type ValidatorResult<T> = Result<T, ValidatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = ValidatorError::Timeout {
            duration: Duration::from_secs(5),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_configuration_is_not_retryable() {
        let err = ValidatorError::Configuration("bad selector".to_string());
        assert!(!err.is_retryable());
        assert!(err.is_fatal_for_job());
    }

    #[test]
    fn test_message_classes_are_retryable() {
        assert!(ValidatorError::Action {
            action: "fill",
            selector: "input[name=q]".to_string(),
            reason: "element not visible".to_string(),
        }
        .is_retryable());

        assert!(ValidatorError::Browser("net::ERR_CONNECTION_RESET".to_string()).is_retryable());

        assert!(!ValidatorError::Action {
            action: "click",
            selector: "#go".to_string(),
            reason: "permission denied".to_string(),
        }
        .is_retryable());
    }
}
