use reqwest::Error as HttpError;

use crate::error::{Classify, ErrorKind};

pub type Result<T, E = OriginError> = std::result::Result<T, E>;

/// Errors from the origin cluster client (spec.md §4.5) and from an
/// origin's own remote-backend refresh path (spec.md §4.6).
#[derive(Debug, thiserror::Error)]
pub enum OriginError {
    #[error("blob not found on any owning origin")]
    NotFound,

    #[error("blob is being prepared from remote backend, retry")]
    /// A `202` response. Distinguished from `Upstream5xx` because spec.md
    /// §4.5 says a 202 on one origin must not cause failover to another.
    Preparing,

    #[error("upstream origin returned {status}")]
    /// A `5xx`/network error. Triggers failover to the next owner.
    Upstream5xx { status: u16 },

    #[error("owning origin rejected the request: {status}")]
    /// A `4xx` (not 404/409). Surfaces immediately, no failover.
    Rejected { status: u16 },

    #[error("commit already applied")]
    /// A `409` on upload commit; treated as success by the caller.
    AlreadyCommitted,

    #[error("retry budget exhausted after {attempts} attempts")]
    BudgetExhausted { attempts: usize },

    #[error("failed to seek upload reader back to start for retry")]
    SeekFailed,

    #[error("no origin in the cluster owns this digest")]
    NoOwners,

    #[error("{0}")]
    Http(#[from] HttpError),
}

impl Classify for OriginError {
    fn kind(&self) -> ErrorKind {
        match self {
            OriginError::NotFound => ErrorKind::NotFound,
            OriginError::Preparing => ErrorKind::Retryable,
            OriginError::Upstream5xx { .. } => ErrorKind::Retryable,
            OriginError::Rejected { .. } => ErrorKind::InvariantViolation,
            OriginError::AlreadyCommitted => ErrorKind::Conflict,
            OriginError::BudgetExhausted { .. } => ErrorKind::Fatal,
            OriginError::SeekFailed => ErrorKind::Fatal,
            OriginError::NoOwners => ErrorKind::Fatal,
            OriginError::Http(_) => ErrorKind::Retryable,
        }
    }
}
