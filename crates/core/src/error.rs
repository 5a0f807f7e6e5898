//! Error types for the roster sync engine.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

/// Top-level error type for all sync engine operations.
///
/// Variants follow the engine's failure taxonomy: only [`SyncError::Authentication`]
/// and [`SyncError::Config`] abort a whole run, everything else is scoped to a
/// single record or a single entity type.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("capability unsupported: {0}")]
    CapabilityUnsupported(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("apply error: {0}")]
    Apply(String),

    #[error("run deadline exceeded after {0:?}")]
    Deadline(Duration),

    #[error("cursor for {scope} cannot move back from {current} to {attempted}")]
    CursorRegression {
        scope: String,
        current: String,
        attempted: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Whether this error must abort the entire sync run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Authentication(_) | SyncError::Config(_))
    }

    /// Whether the failed request may be retried against the retry budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransientNetwork(_) => true,
            SyncError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Classify a reqwest transport failure. Timeouts, refused connections
    /// and resets are transient; anything else (bad URL, TLS setup) is not.
    pub fn from_transport(e: reqwest::Error, context: &str) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            SyncError::TransientNetwork(format!("{context}: {e}"))
        } else {
            SyncError::Http(e)
        }
    }

    /// Map a non-success HTTP status to the error taxonomy.
    pub fn from_status(status: StatusCode, headers: &HeaderMap, context: &str, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SyncError::Authentication(format!("{context} returned {status}: {body}"))
            }
            StatusCode::NOT_FOUND => SyncError::NotFound(context.to_string()),
            StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited {
                retry_after: retry_after(headers).unwrap_or(DEFAULT_RATE_LIMIT_WAIT),
            },
            s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
                SyncError::TransientNetwork(format!("{context} returned {status}"))
            }
            _ => SyncError::Provider(format!("{context} returned {status}: {body}")),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Wait applied when a 429 carries no usable `Retry-After` header.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);

/// Parse a `Retry-After` header expressed in delta-seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// A convenience Result alias that defaults to [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;
