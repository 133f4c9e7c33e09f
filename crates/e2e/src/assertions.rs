//! Assertions and bounded polling
//!
//! Immediate checks return [`E2eError::AssertionMismatch`] carrying the
//! caller's source location. Polling re-evaluates a predicate against fresh
//! state until it holds or the attempt budget runs out, which yields
//! [`E2eError::Timeout`]; the two are kept apart so "wrong answer" and
//! "answer never arrived" read differently in reports.

use regex::Regex;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::panic::Location;
use std::time::Duration;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Interval and attempt budget for one polling call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self { interval, max_attempts }
    }

    /// Evaluations actually made; a zero budget still checks once
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound on time spent sleeping between attempts
    pub fn budget(&self) -> Duration {
        self.interval * self.attempts().saturating_sub(1)
    }
}

#[track_caller]
fn mismatch(actual: impl Into<String>, expected: impl Into<String>) -> E2eError {
    let caller = Location::caller();
    E2eError::AssertionMismatch {
        actual: actual.into(),
        expected: expected.into(),
        location: format!("{}:{}", caller.file(), caller.line()),
    }
}

/// Equality check
#[track_caller]
pub fn ensure_eq<T: PartialEq + Debug>(actual: T, expected: T) -> E2eResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(mismatch(format!("{actual:?}"), format!("{expected:?}")))
    }
}

/// Boolean check with a description of what was expected
#[track_caller]
pub fn ensure(condition: bool, expected: &str, actual: impl Debug) -> E2eResult<()> {
    if condition {
        Ok(())
    } else {
        Err(mismatch(format!("{actual:?}"), expected))
    }
}

/// A response body must be present and not JSON `null`
#[track_caller]
pub fn ensure_defined(body: &Value) -> E2eResult<()> {
    if body.is_null() {
        Err(mismatch("null", "a defined body"))
    } else {
        Ok(())
    }
}

#[track_caller]
pub fn ensure_matches(actual: &str, pattern: &Regex) -> E2eResult<()> {
    if pattern.is_match(actual) {
        Ok(())
    } else {
        Err(mismatch(actual, format!("match for /{}/", pattern.as_str())))
    }
}

/// Evaluate `predicate` until it returns `true`.
///
/// Sleeps `interval` between evaluations, never after the last one, so a
/// predicate that never holds is evaluated exactly `max_attempts` times
/// (at least once).
/// Errors from the predicate abort polling immediately. Returns the attempt
/// number that succeeded.
pub async fn poll_until<F, Fut>(what: &str, policy: PollPolicy, mut predicate: F) -> E2eResult<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<bool>>,
{
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        if predicate().await? {
            debug!("{} ready after {} attempt(s)", what, attempt);
            return Ok(attempt);
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(E2eError::Timeout {
        what: what.to_string(),
        attempts,
    })
}

/// Like [`poll_until`] but yields the first `Some` value the fetch produces
pub async fn poll_for<T, F, Fut>(what: &str, policy: PollPolicy, mut fetch: F) -> E2eResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<Option<T>>>,
{
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        if let Some(value) = fetch().await? {
            debug!("{} ready after {} attempt(s)", what, attempt);
            return Ok(value);
        }
        if attempt < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(E2eError::Timeout {
        what: what.to_string(),
        attempts,
    })
}
