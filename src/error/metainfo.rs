use crate::error::{Classify, ErrorKind};

pub use serde_bencode::Error as BencodeError;

pub type Result<T> = std::result::Result<T, MetainfoError>;

#[derive(thiserror::Error, Debug)]
pub enum MetainfoError {
    #[error("{0}")]
    Bencode(BencodeError),

    #[error("invalid metainfo")]
    InvalidMetainfo,

    #[error("invalid piece hashes")]
    InvalidPieces,

    #[error("invalid tracker url")]
    InvalidTrackerUrl,

    #[error("blob is zero-length, refusing to generate metainfo for it")]
    EmptyBlob,

    #[error("no piece-length policy entry covers a blob of length {0}")]
    NoPieceLengthPolicyMatch(u64),
}

impl From<BencodeError> for MetainfoError {
    fn from(error: BencodeError) -> Self {
        Self::Bencode(error)
    }
}

impl From<url::ParseError> for MetainfoError {
    fn from(_: url::ParseError) -> Self {
        Self::InvalidTrackerUrl
    }
}

impl Classify for MetainfoError {
    fn kind(&self) -> ErrorKind {
        match self {
            MetainfoError::EmptyBlob => ErrorKind::InvariantViolation,
            _ => ErrorKind::Fatal,
        }
    }
}
