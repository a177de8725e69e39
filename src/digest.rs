//! The content-addressed identifier of a blob.
//!
//! A [`Digest`] is a fixed 32-byte SHA-256 hash of a blob's bytes. It is
//! immutable and is the on-disk name of a blob (in hex form) once it leaves
//! the `upload` state (see [`crate::store`]). It is distinct from
//! [`crate::InfoHash`], which identifies a torrent swarm rather than blob
//! content.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Number of bytes in a digest (SHA-256).
pub const DIGEST_LEN: usize = 32;

/// A SHA-256 content digest, the immutable identifier of a blob.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

/// Returned when a string fails to parse as a hex-encoded digest.
#[derive(Debug, thiserror::Error)]
pub enum DigestParseError {
    #[error("digest must be {DIGEST_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Digest {
    /// Computes the digest of `bytes` directly (used in tests and by small
    /// in-memory callers; streaming callers should use [`Hasher`] instead).
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let out = hasher.finalize();
        let mut buf = [0u8; DIGEST_LEN];
        buf.copy_from_slice(&out);
        Digest(buf)
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Hex-encoded form; this is the on-disk file name and the HTTP path
    /// parameter form (spec.md §6).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The two-byte hex shard prefix used to bucket blobs on disk, e.g.
    /// `cache/ab/cd/abcd...` for a digest starting with `abcd`.
    pub fn shard_prefix(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[0..2].to_string(), hex[2..4].to_string())
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != DIGEST_LEN {
            return Err(DigestParseError::WrongLength(bytes.len()));
        }
        let mut buf = [0u8; DIGEST_LEN];
        buf.copy_from_slice(&bytes);
        Ok(Digest(buf))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A streaming SHA-256 hasher, used by the local store to verify a blob on
/// its `download` -> `cache` transition without buffering the whole blob.
pub struct Hasher(Sha256);

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    pub fn new() -> Self {
        Hasher(Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> Digest {
        let out = self.0.finalize();
        let mut buf = [0u8; DIGEST_LEN];
        buf.copy_from_slice(&out);
        Digest(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let d = Digest::of(b"hello world");
        let hex = d.to_hex();
        assert_eq!(hex.len(), DIGEST_LEN * 2);
        let parsed: Digest = hex.parse().unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn wrong_length_rejected() {
        let err = Digest::from_str("abcd").unwrap_err();
        assert!(matches!(err, DigestParseError::WrongLength(2)));
    }

    #[test]
    fn streaming_hasher_matches_oneshot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let oneshot = Digest::of(data);

        let mut hasher = Hasher::new();
        for chunk in data.chunks(7) {
            hasher.update(chunk);
        }
        let streamed = hasher.finalize();

        assert_eq!(oneshot, streamed);
    }

    #[test]
    fn shard_prefix_is_first_two_bytes() {
        let d = Digest::from_bytes([0xab, 0xcd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(d.shard_prefix(), ("ab".to_string(), "cd".to_string()));
    }
}
