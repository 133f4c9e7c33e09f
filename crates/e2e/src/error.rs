//! Error types for E2E testing

use platform_e2e_common::Unconfigured;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("{0}")]
    Unconfigured(Unconfigured),

    #[error("Configuration error: {0}")]
    Config(#[from] platform_e2e_common::Error),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Assertion failed at {location}: expected {expected}, got {actual}")]
    AssertionMismatch {
        actual: String,
        expected: String,
        location: String,
    },

    #[error("Timeout waiting for: {what} ({attempts} attempts exhausted)")]
    Timeout { what: String, attempts: u32 },

    #[error("{scope} exceeded its {after:?} deadline")]
    DeadlineExceeded { scope: String, after: Duration },

    #[error("Unexpected status from {endpoint}: expected {expected:?}, got {actual}: {body}")]
    UnexpectedStatus {
        endpoint: String,
        expected: Vec<u16>,
        actual: u16,
        body: String,
    },

    #[error("Carried state '{key}' was never set by an earlier step")]
    MissingState { key: String },

    #[error("Carried state '{key}' has an unexpected shape: {reason}")]
    StateShape { key: String, reason: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Step panicked: {0}")]
    Panicked(String),

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Group spec parse error: {0}")]
    SpecParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

impl From<Unconfigured> for E2eError {
    fn from(e: Unconfigured) -> Self {
        E2eError::Unconfigured(e)
    }
}

/// Failure classification shown in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unconfigured,
    AuthenticationFailed,
    AssertionMismatch,
    Timeout,
    UnexpectedStatus,
    MissingState,
    Cancelled,
    Harness,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unconfigured => "unconfigured",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::AssertionMismatch => "assertion_mismatch",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnexpectedStatus => "unexpected_status",
            ErrorKind::MissingState => "missing_state",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Harness => "harness",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl E2eError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            E2eError::Unconfigured(_) => ErrorKind::Unconfigured,
            E2eError::AuthenticationFailed(_) => ErrorKind::AuthenticationFailed,
            E2eError::AssertionMismatch { .. } => ErrorKind::AssertionMismatch,
            E2eError::Timeout { .. } | E2eError::DeadlineExceeded { .. } => ErrorKind::Timeout,
            E2eError::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
            E2eError::MissingState { .. } | E2eError::StateShape { .. } => ErrorKind::MissingState,
            E2eError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Harness,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform_e2e_common::ConfigKey;

    #[test]
    fn test_deadline_is_reported_as_timeout() {
        let err = E2eError::DeadlineExceeded {
            scope: "step 'create branch'".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_unconfigured_message_lists_keys() {
        let err = E2eError::from(Unconfigured {
            missing: vec![ConfigKey::ProjectRef, ConfigKey::AccessToken],
        });
        assert_eq!(err.kind(), ErrorKind::Unconfigured);
        assert_eq!(err.to_string(), "missing configuration: PROJECT_REF, ACCESS_TOKEN");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnexpectedStatus).unwrap();
        assert_eq!(json, "\"unexpected_status\"");
    }
}
