//! Error taxonomy for the engine.
//!
//! Mirrors the teacher crate's shape: one `thiserror` enum per component
//! (`store`, `metainfo`, `peer`, `torrent`, `tracker`, `origin`) plus a
//! crate-wide [`Error`] that wraps each with `From` impls and a handful of
//! cross-cutting variants. On top of that shape, blobmesh adds the kind
//! taxonomy spec.md §7 names, so callers can match on *kind* (retryable?
//! fatal? benign conflict?) instead of re-deriving it from HTTP status codes
//! at every call site.

pub mod metainfo;
pub mod origin;
pub mod peer;
pub mod store;
pub mod torrent;
pub mod tracker;

use std::net::SocketAddr;

pub use metainfo::MetainfoError;
pub use origin::OriginError;
pub use peer::{PeerError, Result as PeerResult};
pub use store::{NewBlobError, ReadError, Result as StoreResult, WriteError};
pub use tokio::{io::Error as IoError, sync::mpsc::error::SendError};
pub use torrent::{Result as TorrentResult, TorrentError};
pub use tracker::{Result as TrackerResult, TrackerError};

use crate::InfoHash;

pub type EngineResult<T, E = Error> = std::result::Result<T, E>;

/// The error-kind taxonomy from spec.md §7. Every concrete error type in
/// this crate classifies itself via [`Classify::kind`]; retry loops, HTTP
/// status mapping, and propagation policy all dispatch on this instead of
/// inspecting individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Blob or tag absent. Maps to HTTP 404.
    NotFound,
    /// Origin is preparing the blob (202) or upstream is momentarily
    /// unavailable (5xx / network). Caller must back off and/or fail over.
    Retryable,
    /// Benign duplicate; caller should treat as success (HTTP 409).
    Conflict,
    /// Piece hash mismatch, info-hash mismatch, or a state-machine
    /// violation. Non-retryable; poisons the enclosing entity.
    InvariantViolation,
    /// Connection or piece budget full. Local to the scheduler; never
    /// surfaced externally, only manifests as delay.
    CapacityExhausted,
    /// Cooperative cancellation by caller or scheduler.
    Cancelled,
    /// Disk errors, malformed metainfo. Abort and surface.
    Fatal,
}

pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("channel error")]
    /// The channel on which some component in engine was listening or
    /// sending died.
    Channel,

    #[error("invalid download path")]
    /// The torrent download location is not valid.
    InvalidDownloadPath,

    #[error("no such swarm")]
    /// The info hash did not correspond to any active torrent.
    UnknownInfoHash,

    #[error("{0}")]
    /// Holds global IO related errors.
    Io(IoError),

    #[error("torrent {info_hash:x?} error: {error}")]
    /// An error specific to a torrent's lifecycle.
    Torrent {
        info_hash: InfoHash,
        error: TorrentError,
    },

    #[error("torrent {info_hash:x?} tracker error: {error}")]
    /// An error that occurred while a torrent was announcing to tracker.
    Tracker {
        info_hash: InfoHash,
        error: TrackerError,
    },

    #[error("torrent {info_hash:x?} peer {addr} error: {error}")]
    /// An error that occurred in a torrent's session with a peer.
    Peer {
        info_hash: InfoHash,
        addr: SocketAddr,
        error: PeerError,
    },

    #[error("store error: {0}")]
    Store(#[from] store::Error),

    #[error("origin error: {0}")]
    Origin(#[from] OriginError),

    #[error("metainfo error: {0}")]
    Metainfo(#[from] MetainfoError),

    #[error("cancelled")]
    Cancelled,
}

impl From<IoError> for Error {
    fn from(value: IoError) -> Self {
        Self::Io(value)
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Self {
        Self::Channel
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Channel => ErrorKind::Fatal,
            Error::InvalidDownloadPath => ErrorKind::Fatal,
            Error::UnknownInfoHash => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::Fatal,
            Error::Torrent { error, .. } => error.kind(),
            Error::Tracker { error, .. } => error.kind(),
            Error::Peer { error, .. } => error.kind(),
            Error::Store(e) => e.kind(),
            Error::Origin(e) => e.kind(),
            Error::Metainfo(e) => e.kind(),
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Maps an [`ErrorKind`] to the HTTP status code spec.md §6/§7 assigns it.
/// `Retryable` is 202 here (the common case in this codebase: origin is
/// preparing a blob); callsites that mean "upstream 5xx" map that
/// distinction themselves since it's about *why* something is retryable,
/// not a property of the kind itself.
pub fn http_status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::NotFound => 404,
        ErrorKind::Retryable => 202,
        ErrorKind::Conflict => 409,
        ErrorKind::InvariantViolation => 422,
        ErrorKind::CapacityExhausted => 503,
        ErrorKind::Cancelled => 499,
        ErrorKind::Fatal => 500,
    }
}
