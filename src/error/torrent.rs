use tokio::io::Error as IoError;
use tokio::sync::mpsc::error::SendError;

use crate::error::{Classify, ErrorKind};

pub type Result<T, E = TorrentError> = std::result::Result<T, E>;

/// Errors in a torrent's lifecycle state machine (spec.md §4.3.3).
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("channel error")]
    Channel,

    #[error("tracker rejected the info hash")]
    /// spec.md §4.3.8 "hard failure (tracker rejects the InfoHash) expires
    /// the torrent."
    TrackerRejected,

    #[error("time-to-idle expired with no progress")]
    /// spec.md §4.3.3 "On TTI expiry with no progress -> tear down."
    TtiExpired,

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Io(std::io::Error),
}

impl From<IoError> for TorrentError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl<T> From<SendError<T>> for TorrentError {
    fn from(_: SendError<T>) -> Self {
        Self::Channel
    }
}

impl Classify for TorrentError {
    fn kind(&self) -> ErrorKind {
        match self {
            TorrentError::Channel => ErrorKind::Fatal,
            TorrentError::TrackerRejected => ErrorKind::InvariantViolation,
            TorrentError::TtiExpired => ErrorKind::Cancelled,
            TorrentError::Cancelled => ErrorKind::Cancelled,
            TorrentError::Io(_) => ErrorKind::Fatal,
        }
    }
}
