use crate::error::{Classify, ErrorKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type returned on failed blob allocations (`CreateUpload` /
/// `MoveUploadToDownload`).
///
/// Non-fatal: callers are expected to abandon that upload/download and
/// retry (spec.md §4.1 "Failure semantics").
#[derive(Debug, thiserror::Error)]
pub enum NewBlobError {
    #[error("a download file for this digest already exists; resume instead")]
    AlreadyExists,
    #[error("blob is zero-length, which this store rejects")]
    EmptyBlob,
    #[error("{0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for NewBlobError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error type returned on failed piece writes.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("{0}")]
    Io(std::io::Error),
    #[error("piece status cannot regress from {from:?} to {to:?}")]
    InvalidStatusTransition {
        from: crate::store::PieceStatus,
        to: crate::store::PieceStatus,
    },
    #[error("piece failed hash verification")]
    HashMismatch,
}

impl From<std::io::Error> for WriteError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Error type returned on failed piece/blob reads.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("invalid piece index")]
    InvalidPieceIndex,
    #[error("blob data missing or not yet downloaded")]
    MissingData,
    #[error("{0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Top-level store error, combining the above plus the state-transition and
/// lifecycle violations spec.md §4.1/§8 call out (refcount-guarded trash,
/// not-all-pieces-clean cache promotion, blob not found).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("blob not found")]
    NotFound,
    #[error("{0}")]
    NewBlob(#[from] NewBlobError),
    #[error("{0}")]
    Write(#[from] WriteError),
    #[error("{0}")]
    Read(#[from] ReadError),
    #[error("cannot move to cache: piece {0} is not clean")]
    IncompletePieces(crate::PieceIndex),
    #[error("cannot move to trash: {0} active readers hold this blob")]
    BlobInUse(usize),
    #[error("{0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound => ErrorKind::NotFound,
            Error::NewBlob(NewBlobError::AlreadyExists) => ErrorKind::Conflict,
            Error::NewBlob(NewBlobError::EmptyBlob) => ErrorKind::InvariantViolation,
            Error::NewBlob(NewBlobError::Io(_)) => ErrorKind::Fatal,
            Error::Write(WriteError::HashMismatch) => ErrorKind::InvariantViolation,
            Error::Write(WriteError::InvalidStatusTransition { .. }) => {
                ErrorKind::InvariantViolation
            }
            Error::Write(WriteError::Io(_)) => ErrorKind::Fatal,
            Error::Read(ReadError::MissingData) => ErrorKind::NotFound,
            Error::Read(ReadError::InvalidPieceIndex) => ErrorKind::InvariantViolation,
            Error::Read(ReadError::Io(_)) => ErrorKind::Fatal,
            Error::IncompletePieces(_) => ErrorKind::InvariantViolation,
            Error::BlobInUse(_) => ErrorKind::CapacityExhausted,
            Error::Io(_) => ErrorKind::Fatal,
        }
    }
}
