use crate::error::{Classify, ErrorKind};

pub use tokio::{io::Error as IoError, sync::mpsc::error::SendError};

pub type Result<T, E = PeerError> = std::result::Result<T, E>;

/// Errors arising in a single connection's state machine (spec.md §4.3.4).
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("info hash mismatch on handshake")]
    /// The remote peer's info hash did not match the torrent we offered it
    /// on. The connection is rejected during handshake.
    InfoHashMismatch,

    #[error("self connection")]
    /// The remote peer ID matches our own; we dialed ourselves.
    SelfConnection,

    #[error("peer is blacklisted")]
    /// The remote peer is within its blacklist window (spec.md §4.3.6).
    Blacklisted,

    #[error("connection capacity exhausted")]
    /// `MaxConns`/`MaxConnsPerTorrent` reached and this peer wasn't picked
    /// as a usable replacement (spec.md §4.3.7).
    OverCapacity,

    #[error("connection bound to torrent not in an active state")]
    /// A connection arrived for a torrent whose state is not
    /// `Announcing`/`Leeching`/`Seeding`.
    TorrentNotActive,

    #[error("channel error")]
    Channel,

    #[error("inactivity timeout")]
    /// A connection's TTI expired with no progress (spec.md §4.3.3).
    InactivityTimeout,

    #[error("invalid piece index")]
    InvalidPieceIndex,

    #[error("peer supplied piece that failed hash verification")]
    /// spec.md §8 "Peer supplying a piece that fails hash verification"
    PieceHashMismatch,

    #[error("malformed wire message")]
    MalformedMessage,

    #[error("{0}")]
    Io(std::io::Error),
}

impl From<IoError> for PeerError {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl<T> From<SendError<T>> for PeerError {
    fn from(_: SendError<T>) -> Self {
        Self::Channel
    }
}

impl Classify for PeerError {
    fn kind(&self) -> ErrorKind {
        match self {
            PeerError::InfoHashMismatch => ErrorKind::InvariantViolation,
            PeerError::SelfConnection => ErrorKind::InvariantViolation,
            PeerError::Blacklisted => ErrorKind::CapacityExhausted,
            PeerError::OverCapacity => ErrorKind::CapacityExhausted,
            PeerError::TorrentNotActive => ErrorKind::InvariantViolation,
            PeerError::Channel => ErrorKind::Fatal,
            PeerError::InactivityTimeout => ErrorKind::Cancelled,
            PeerError::InvalidPieceIndex => ErrorKind::InvariantViolation,
            PeerError::PieceHashMismatch => ErrorKind::InvariantViolation,
            PeerError::MalformedMessage => ErrorKind::InvariantViolation,
            PeerError::Io(_) => ErrorKind::Fatal,
        }
    }
}
