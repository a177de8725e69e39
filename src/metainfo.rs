//! Deterministic mapping from a blob's bytes and a piece-length policy to a
//! [`MetaInfo`] record, and its wire serialization.
//!
//! A `raw` submodule holds the exact bencode-dictionary shape serde_bencode
//! serializes, kept separate from the public, already-validated
//! [`MetaInfo`] callers use elsewhere. Unlike a torrent client reading a
//! `.torrent` file handed to it, the pieces here are generated from a blob
//! the local store already holds in full.

use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use sha1::Digest as _;

use crate::digest::Digest;
use crate::error::metainfo::MetainfoError;
use crate::{InfoHash, PieceIndex, Sha1Hash};

pub type Result<T> = std::result::Result<T, MetainfoError>;

/// One rung of the piece-length ladder: blobs up to `max_total_len` bytes
/// use `piece_len` bytes per piece. Entries must be sorted ascending by
/// `max_total_len`, and the last one should cover `u64::MAX` so every size
/// resolves to something.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceLengthPolicy(pub Vec<(u64, u32)>);

impl Default for PieceLengthPolicy {
    fn default() -> Self {
        const KIB: u32 = 1024;
        const MIB: u32 = 1024 * KIB;
        PieceLengthPolicy(vec![
            (1 * MIB as u64, 64 * KIB),
            (64 * MIB as u64, 512 * KIB),
            (512 * MIB as u64, 2 * MIB),
            (4 * 1024 * MIB as u64, 4 * MIB),
            (u64::MAX, 8 * MIB),
        ])
    }
}

impl PieceLengthPolicy {
    /// Picks a piece length for a blob of `total_len` bytes: the first
    /// ladder rung whose `max_total_len` covers it.
    pub fn piece_length_for(&self, total_len: u64) -> Result<u32> {
        self.0
            .iter()
            .find(|(max, _)| total_len <= *max)
            .map(|(_, len)| *len)
            .ok_or(MetainfoError::NoPieceLengthPolicyMatch(total_len))
    }
}

/// Number of pieces a blob of `total_len` bytes splits into at `piece_len`
/// bytes per piece: `ceil(total_len / piece_len)`.
pub fn piece_count(total_len: u64, piece_len: u32) -> usize {
    if total_len == 0 {
        return 0;
    }
    ((total_len + piece_len as u64 - 1) / piece_len as u64) as usize
}

/// Length of the piece at `index`, accounting for a short final piece.
pub fn piece_len_at(total_len: u64, piece_len: u32, index: PieceIndex) -> u32 {
    let start = index as u64 * piece_len as u64;
    debug_assert!(start < total_len);
    std::cmp::min(piece_len as u64, total_len - start) as u32
}

/// Binds a blob's digest to its piece layout and per-piece SHA-1 hashes.
#[derive(Clone)]
pub struct MetaInfo {
    /// Content-addressed identity of the blob this metainfo describes.
    pub digest: Digest,
    /// Total blob length in bytes.
    pub total_length: u64,
    /// Bytes per piece, except possibly the last.
    pub piece_length: u32,
    /// SHA-1 of each piece, in order. `piece_hashes.len() == piece_count()`.
    pub piece_hashes: Vec<Sha1Hash>,
    /// SHA-1 over the canonical serialization of the info dictionary;
    /// identifies the swarm transferring this blob.
    pub info_hash: InfoHash,
    /// Tracker announce URL, if one was baked in at generation time.
    pub announce: Option<String>,
}

impl fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaInfo")
            .field("digest", &self.digest)
            .field("total_length", &self.total_length)
            .field("piece_length", &self.piece_length)
            .field("piece_count", &self.piece_hashes.len())
            .field("info_hash", &hex::encode(self.info_hash))
            .finish()
    }
}

impl MetaInfo {
    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn piece_len(&self, index: PieceIndex) -> u32 {
        piece_len_at(self.total_length, self.piece_length, index)
    }

    /// Generates metainfo for a blob by hashing it piece-by-piece from
    /// `reader`, which must yield exactly `total_length` bytes.
    ///
    /// Zero-length blobs are rejected: with zero pieces, completion would
    /// be vacuously true without ever verifying any content.
    pub fn generate(
        digest: Digest,
        total_length: u64,
        mut reader: impl Read,
        policy: &PieceLengthPolicy,
        announce: Option<String>,
    ) -> Result<Self> {
        if total_length == 0 {
            return Err(MetainfoError::EmptyBlob);
        }
        let piece_length = policy.piece_length_for(total_length)?;
        let count = piece_count(total_length, piece_length);
        let mut piece_hashes = Vec::with_capacity(count);

        let mut buf = vec![0u8; piece_length as usize];
        for index in 0..count {
            let len = piece_len_at(total_length, piece_length, index) as usize;
            reader
                .read_exact(&mut buf[..len])
                .map_err(|_| MetainfoError::InvalidPieces)?;
            let mut hasher = sha1::Sha1::new();
            hasher.update(&buf[..len]);
            let digest_bytes = hasher.finalize();
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&digest_bytes);
            piece_hashes.push(hash);
        }

        let info = raw::Info {
            length: total_length,
            name: digest.to_hex(),
            piece_length,
            pieces: concat_hashes(&piece_hashes),
        };
        let info_hash = info.info_hash()?;

        Ok(MetaInfo {
            digest,
            total_length,
            piece_length,
            piece_hashes,
            info_hash,
            announce,
        })
    }

    /// Serializes to bytes that reproduce the same `info_hash` on every
    /// call given the same fields.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let raw = raw::MetaInfo {
            announce: self.announce.clone(),
            info: raw::Info {
                length: self.total_length,
                name: self.digest.to_hex(),
                piece_length: self.piece_length,
                pieces: concat_hashes(&self.piece_hashes),
            },
        };
        Ok(serde_bencode::to_bytes(&raw)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: raw::MetaInfo = serde_bencode::from_bytes(bytes)?;

        if raw.info.pieces.len() % 20 != 0 {
            return Err(MetainfoError::InvalidPieces);
        }
        if raw.info.length == 0 {
            return Err(MetainfoError::EmptyBlob);
        }

        let digest: Digest = raw
            .info
            .name
            .parse()
            .map_err(|_| MetainfoError::InvalidMetainfo)?;

        let piece_hashes: Vec<Sha1Hash> = raw
            .info
            .pieces
            .chunks_exact(20)
            .map(|c| {
                let mut h = [0u8; 20];
                h.copy_from_slice(c);
                h
            })
            .collect();

        let expected_count = piece_count(raw.info.length, raw.info.piece_length);
        if piece_hashes.len() != expected_count {
            return Err(MetainfoError::InvalidPieces);
        }

        let info_hash = raw.info.info_hash()?;

        Ok(MetaInfo {
            digest,
            total_length: raw.info.length,
            piece_length: raw.info.piece_length,
            piece_hashes,
            info_hash,
            announce: raw.announce,
        })
    }
}

fn concat_hashes(hashes: &[Sha1Hash]) -> Vec<u8> {
    let mut out = Vec::with_capacity(hashes.len() * 20);
    for h in hashes {
        out.extend_from_slice(h);
    }
    out
}

mod raw {
    //! Bencode dictionary shape: `{announce, info:{length, name, piece
    //! length, pieces}}`. The `info` dict's fields are declared here in
    //! already-sorted byte order (`length` < `name` < `piece length` <
    //! `pieces`) since serde_bencode emits struct fields in declaration
    //! order and canonical bencode requires sorted dictionary keys -- the
    //! info hash is only reproducible if this order is kept.
    use serde_derive::{Deserialize, Serialize};
    use sha1::Digest as _;

    use crate::InfoHash;

    #[derive(Debug, Serialize, Deserialize)]
    pub struct MetaInfo {
        pub announce: Option<String>,
        pub info: Info,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Info {
        /// size of the blob in bytes
        pub length: u64,
        /// hex digest, used as the suggested on-disk file name
        pub name: String,
        #[serde(rename = "piece length")]
        pub piece_length: u32,
        #[serde(with = "serde_bytes")]
        /// concatenation of each piece's SHA-1 hash, a multiple of 20 bytes
        pub pieces: Vec<u8>,
    }

    impl Info {
        pub fn info_hash(&self) -> super::Result<InfoHash> {
            let bytes = serde_bencode::to_bytes(self)?;
            let mut hasher = sha1::Sha1::new();
            hasher.update(&bytes);
            let digest = hasher.finalize();
            let mut out = [0u8; 20];
            out.copy_from_slice(&digest);
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn generate_single_piece_blob() {
        let data = sample_blob(1000);
        let digest = Digest::of(&data);
        let policy = PieceLengthPolicy::default();
        let mi = MetaInfo::generate(digest, data.len() as u64, data.as_slice(), &policy, None)
            .unwrap();
        assert_eq!(mi.piece_count(), 1);
        assert_eq!(mi.piece_len(0), 1000);
    }

    #[test]
    fn final_piece_is_short() {
        let piece_len = 1024u32;
        let policy = PieceLengthPolicy(vec![(u64::MAX, piece_len)]);
        let total = (piece_len as usize) * 3 + 17;
        let data = sample_blob(total);
        let digest = Digest::of(&data);
        let mi =
            MetaInfo::generate(digest, data.len() as u64, data.as_slice(), &policy, None).unwrap();
        assert_eq!(mi.piece_count(), 4);
        assert_eq!(mi.piece_len(0), piece_len);
        assert_eq!(mi.piece_len(3), 17);
    }

    #[test]
    fn zero_length_blob_is_rejected() {
        let digest = Digest::of(b"");
        let policy = PieceLengthPolicy::default();
        let err = MetaInfo::generate(digest, 0, &[][..], &policy, None).unwrap_err();
        assert!(matches!(err, MetainfoError::EmptyBlob));
    }

    #[test]
    fn serialize_roundtrip_preserves_info_hash() {
        let data = sample_blob(5000);
        let digest = Digest::of(&data);
        let policy = PieceLengthPolicy(vec![(u64::MAX, 1024)]);
        let mi = MetaInfo::generate(
            digest,
            data.len() as u64,
            data.as_slice(),
            &policy,
            Some("http://tracker.example/announce".into()),
        )
        .unwrap();

        let bytes = mi.serialize().unwrap();
        let mi2 = MetaInfo::from_bytes(&bytes).unwrap();

        assert_eq!(mi.info_hash, mi2.info_hash);
        assert_eq!(mi.digest, mi2.digest);
        assert_eq!(mi.piece_hashes, mi2.piece_hashes);
        assert_eq!(mi.announce, mi2.announce);
    }

    #[test]
    fn serialize_is_deterministic() {
        let data = sample_blob(2048);
        let digest = Digest::of(&data);
        let policy = PieceLengthPolicy(vec![(u64::MAX, 512)]);
        let a = MetaInfo::generate(digest, data.len() as u64, data.as_slice(), &policy, None)
            .unwrap();
        let b = MetaInfo::generate(digest, data.len() as u64, data.as_slice(), &policy, None)
            .unwrap();
        assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());
    }

    #[test]
    fn piece_length_policy_picks_smallest_matching_rung() {
        let policy = PieceLengthPolicy::default();
        assert_eq!(policy.piece_length_for(500).unwrap(), 64 * 1024);
        assert_eq!(
            policy.piece_length_for(100 * 1024 * 1024).unwrap(),
            2 * 1024 * 1024
        );
    }
}
