//! Domain errors for the query cache.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures a query or mutation can settle with.
///
/// Every variant is local to the cache entry or mutation that produced it;
/// none of them is fatal to the cache engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The request never produced an HTTP response (connection refused,
    /// DNS failure, timeout, aborted task).
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("Unexpected response shape: {0}")]
    Transform(String),
}

impl QueryError {
    /// Create an HTTP error from a status code and message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Http { .. } => ErrorKind::Http,
            Self::Transform(_) => ErrorKind::Transform,
        }
    }

    /// HTTP status code, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Network(message) | Self::Transform(message) => message,
            Self::Http { message, .. } => message,
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transform(err.to_string())
    }
}

/// Error category stored on a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Http,
    Transform,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Http => write!(f, "http"),
            Self::Transform => write!(f, "transform"),
        }
    }
}

/// Normalized error as stored in a `CacheEntry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl From<&QueryError> for ErrorInfo {
    fn from(err: &QueryError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
            status: err.status(),
        }
    }
}

impl From<ErrorInfo> for QueryError {
    fn from(info: ErrorInfo) -> Self {
        match info.kind {
            ErrorKind::Network => Self::Network(info.message),
            ErrorKind::Http => Self::Http {
                status: info.status.unwrap_or_default(),
                message: info.message,
            },
            ErrorKind::Transform => Self::Transform(info.message),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} error ({}): {}", self.kind, status, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
