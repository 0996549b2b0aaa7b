//! Whole-invocation retry on transient network failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{FailureKind, InvocationError};
use crate::metrics;

/// Message fragments that mark a failure as transient.
pub const RETRYABLE_PATTERNS: [&str; 4] = [
    "response ended prematurely",
    "protocol error",
    "connection",
    "timeout",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

/// Progress of one retried invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    Attempting(u32),
    Success,
    RetryableFailure(u32),
    FatalFailure,
}

/// Only protocol and event-loop failures are candidates, and only when the
/// message names a transient condition.
pub fn is_retryable(kind: FailureKind, message: &str) -> bool {
    if !matches!(kind, FailureKind::Protocol | FailureKind::EventLoop) {
        return false;
    }
    let message = message.to_lowercase();
    RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Run `operation` until it succeeds, fails fatally, or the budget runs out.
///
/// The closure receives the 1-based attempt number.
pub async fn invoke_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, InvocationError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, InvocationError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        debug!(state = ?AttemptState::Attempting(attempt), "invoking agent");

        match operation(attempt).await {
            Ok(value) => {
                metrics::record_attempt("success");
                info!(attempt, state = ?AttemptState::Success, "agent invocation succeeded");
                return Ok(value);
            }
            Err(err) if attempt < max_attempts && is_retryable(err.kind, &err.message) => {
                metrics::record_attempt("retryable");
                warn!(
                    attempt,
                    max_attempts,
                    state = ?AttemptState::RetryableFailure(attempt),
                    delay_secs = policy.delay.as_secs_f64(),
                    error = %err,
                    "transient failure during agent invocation; retrying"
                );
                sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => {
                metrics::record_attempt("fatal");
                warn!(attempt, state = ?AttemptState::FatalFailure, error = %err, "agent invocation failed");
                return Err(err);
            }
        }
    }
}
