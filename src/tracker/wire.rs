//! JSON wire shapes for the announce endpoint (spec.md §4.4, §6).
//!
//! Swapped from the teacher's bencode-over-HTTP-GET tracker protocol to
//! JSON-over-POST: info hashes and peer ids are hex strings rather than
//! raw bytes in a query string, and a single body carries the whole
//! request instead of a parameter list.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{InfoHash, PeerId};

/// Parameters for announcing to the tracker. Analogous to the teacher's
/// `Announce`, minus BitTorrent-specific byte counters this system has no
/// use for (whole-piece transfer has no partial-byte progress to report).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRequest {
    #[serde(with = "hex_hash")]
    pub info_hash: InfoHash,
    #[serde(with = "hex_hash")]
    pub peer_id: PeerId,
    pub port: u16,
    /// Availability zone this peer reports running in, used for
    /// same-zone-preferred peer sampling.
    pub zone: String,
    /// True once this peer holds every piece of the torrent (a seeder).
    pub complete: bool,
    /// Upper bound on how many peers the caller wants back. The tracker
    /// may return fewer.
    pub peer_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerAddr {
    pub addr: SocketAddr,
    pub zone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceResponse {
    pub peers: Vec<PeerAddr>,
    /// How long the caller should wait before announcing again.
    pub interval_secs: u64,
}

/// Hex-string (de)serialization for a 20-byte hash, so the JSON wire shows
/// e.g. `"a94a8fe5ccb19ba61c4c0873d391e987982fbbd3"` rather than an array
/// of 20 integers.
pub mod hex_hash {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(hash: &[u8; 20], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        hex::encode(hash).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 20], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        if bytes.len() != 20 {
            return Err(serde::de::Error::custom(format!(
                "expected a 20-byte hex hash, got {} bytes",
                bytes.len()
            )));
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_request_roundtrips_through_json() {
        let req = AnnounceRequest {
            info_hash: [7u8; 20],
            peer_id: *b"blobmesh-agent-00001",
            port: 6890,
            zone: "us-east-1a".into(),
            complete: false,
            peer_count: Some(30),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("0707070707070707070707070707070707070707"));
        let back: AnnounceRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.info_hash, req.info_hash);
        assert_eq!(back.peer_id, req.peer_id);
    }

    #[test]
    fn rejects_wrong_length_hex() {
        let json = r#"{"info_hash":"ab","peer_id":"cd","port":1,"zone":"z","complete":false,"peer_count":null}"#;
        let err = serde_json::from_str::<AnnounceRequest>(json).unwrap_err();
        assert!(err.to_string().contains("20-byte"));
    }
}
