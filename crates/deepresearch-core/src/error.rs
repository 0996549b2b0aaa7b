use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for DeepResearch.
#[derive(Debug, Error)]
pub enum DeepResearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("failed to load secret '{secret_id}': {reason}")]
    SecretFetch { secret_id: String, reason: String },
    #[error("I/O error while accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upload of {key} failed: {reason}")]
    Upload { key: String, reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeepResearchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn secret_fetch(secret_id: impl Into<String>, reason: impl ToString) -> Self {
        Self::SecretFetch {
            secret_id: secret_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn upload(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Upload {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Where an invocation failure originated.
///
/// `Protocol` and `EventLoop` are the recognized network/framework kinds; only
/// those are ever considered for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transport-level failure (connection reset, truncated body, timeout).
    Protocol,
    /// Failure raised by the agent execution loop itself.
    EventLoop,
    /// Anything else: bad input, HTTP status errors, file I/O.
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Protocol => "protocol",
            FailureKind::EventLoop => "event_loop",
            FailureKind::Other => "other",
        }
    }
}

/// Error raised while invoking an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationError {
    pub kind: FailureKind,
    pub message: String,
}

impl InvocationError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Protocol, message)
    }

    pub fn event_loop(message: impl Into<String>) -> Self {
        Self::new(FailureKind::EventLoop, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for InvocationError {}

impl From<reqwest::Error> for InvocationError {
    fn from(error: reqwest::Error) -> Self {
        let detail = error_chain(&error);
        if error.is_timeout() {
            Self::protocol(format!("timeout: {detail}"))
        } else if error.is_connect() {
            Self::protocol(format!("connection error: {detail}"))
        } else if error.is_body() || error.is_request() {
            Self::protocol(format!("protocol error: {detail}"))
        } else {
            Self::other(detail)
        }
    }
}

/// Render an error together with its `source()` chain.
pub(crate) fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

impl From<DeepResearchError> for InvocationError {
    fn from(error: DeepResearchError) -> Self {
        Self::other(error.to_string())
    }
}
