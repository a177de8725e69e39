use reqwest::Error as HttpError;

use crate::error::{Classify, ErrorKind};

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

/// Errors arising when announcing to the tracker (spec.md §4.4).
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("{0}")]
    Json(serde_json::Error),

    #[error("{0}")]
    Http(HttpError),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    /// The tracker's per-infohash admission control rejected this announce.
    RateLimited { retry_after_ms: u64 },

    #[error("info hash unknown to tracker")]
    UnknownInfoHash,
}

impl From<serde_json::Error> for TrackerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<HttpError> for TrackerError {
    fn from(value: HttpError) -> Self {
        Self::Http(value)
    }
}

impl Classify for TrackerError {
    fn kind(&self) -> ErrorKind {
        match self {
            TrackerError::Json(_) => ErrorKind::Fatal,
            TrackerError::Http(_) => ErrorKind::Retryable,
            TrackerError::RateLimited { .. } => ErrorKind::Retryable,
            TrackerError::UnknownInfoHash => ErrorKind::InvariantViolation,
        }
    }
}
