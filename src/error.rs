//! Error types shared across collectors, metadata lookups and aggregation

use reqwest::StatusCode;
use thiserror::Error;

/// Failure to turn manifest contents into dependency records
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dependency section \"{class}\" is not an object")]
    InvalidSection { class: String },
}

/// Failure of a remote metadata lookup
///
/// Every variant is non-fatal to an analysis batch: the affected dependency
/// is treated as resolved without diagnostics.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no metadata server is configured")]
    NotConfigured,

    #[error("metadata server URL {0:?} cannot carry a lookup path")]
    InvalidServerUrl(String),

    #[error("metadata server rejected the API token (401 Unauthorized)")]
    Unauthorized,

    #[error("metadata server is rate limiting or refusing requests ({0})")]
    RateLimited(StatusCode),

    #[error("metadata server rejected the request as malformed (400 Bad Request)")]
    BadRequest,

    #[error("metadata server returned {0}")]
    Status(StatusCode),

    #[error("metadata request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metadata response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LookupError {
    /// Map a non-success HTTP status to its typed rejection
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => LookupError::Unauthorized,
            StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => {
                LookupError::RateLimited(status)
            }
            StatusCode::BAD_REQUEST => LookupError::BadRequest,
            other => LookupError::Status(other),
        }
    }
}

/// Misuse of a completion aggregator
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("dependency #{index} is not part of this batch of {len}")]
    UnknownDependency { index: usize, len: usize },
}
