//! `PeerContext`: the shape an origin exposes at `/internal/peercontext`
//! (spec.md §6) and that the tracker records per swarm member.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::PeerId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerContext {
    #[serde(with = "crate::tracker::wire::hex_hash")]
    pub peer_id: PeerId,
    pub addr: SocketAddr,
    pub zone: String,
    pub cluster: String,
    /// True for origin seeders, registered permanently with the tracker
    /// rather than expiring on `PeerTTL`.
    pub origin: bool,
}
