//! A single peer connection's state machine: `Handshaking -> Open ->
//! Closed`. Handshaking validates the info hash and rejects self
//! connections before a connection is allowed to exchange piece traffic.

use std::net::SocketAddr;
use std::time::Instant;

use crate::counter::ThruputCounters;
use crate::error::peer::PeerError;
use crate::{Bitfield, InfoHash, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Open,
    Closed,
}

pub struct Connection {
    pub addr: SocketAddr,
    pub peer_id: Option<PeerId>,
    pub info_hash: InfoHash,
    pub state: ConnectionState,
    pub peer_pieces: Bitfield,
    pub counters: ThruputCounters,
    pub last_activity: Instant,
    /// Outstanding piece requests this connection has made to the remote
    /// peer and not yet seen a `Piece`/`Cancel` resolve, with the instant
    /// each was issued so preemption can find the ones that have aged out.
    pub in_flight: Vec<(crate::PieceIndex, Instant)>,
}

impl Connection {
    pub fn new(addr: SocketAddr, info_hash: InfoHash, piece_count: usize, now: Instant) -> Self {
        Connection {
            addr,
            peer_id: None,
            info_hash,
            state: ConnectionState::Handshaking,
            peer_pieces: Bitfield::repeat(false, piece_count),
            counters: ThruputCounters::new(),
            last_activity: now,
            in_flight: Vec::new(),
        }
    }

    /// Validates a completed handshake and, if valid, opens the connection.
    pub fn on_handshake(
        &mut self,
        remote_info_hash: InfoHash,
        remote_peer_id: PeerId,
        our_peer_id: PeerId,
        now: Instant,
    ) -> Result<(), PeerError> {
        if remote_info_hash != self.info_hash {
            self.state = ConnectionState::Closed;
            return Err(PeerError::InfoHashMismatch);
        }
        if remote_peer_id == our_peer_id {
            self.state = ConnectionState::Closed;
            return Err(PeerError::SelfConnection);
        }
        self.peer_id = Some(remote_peer_id);
        self.state = ConnectionState::Open;
        self.last_activity = now;
        Ok(())
    }

    pub fn on_bitfield(&mut self, bitfield: Bitfield) {
        self.peer_pieces = bitfield;
    }

    pub fn on_have(&mut self, index: crate::PieceIndex) {
        if index < self.peer_pieces.len() {
            self.peer_pieces.set(index, true);
        }
    }

    pub fn note_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Number of piece requests sent to this peer with no resolution yet,
    /// the quantity the `MaxPendingPieces` budget bounds.
    pub fn pending_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn has_pending(&self, index: crate::PieceIndex) -> bool {
        self.in_flight.iter().any(|(i, _)| *i == index)
    }

    pub fn request_started(&mut self, index: crate::PieceIndex, now: Instant) {
        if !self.has_pending(index) {
            self.in_flight.push((index, now));
        }
    }

    /// Resets a pending request's clock without sending anything, used when
    /// preemption re-issues the piece elsewhere but leaves this connection
    /// free to still deliver it.
    pub fn refresh_pending(&mut self, index: crate::PieceIndex, now: Instant) {
        if let Some(entry) = self.in_flight.iter_mut().find(|(i, _)| *i == index) {
            entry.1 = now;
        }
    }

    pub fn request_resolved(&mut self, index: crate::PieceIndex) {
        self.in_flight.retain(|(i, _)| *i != index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_with_matching_info_hash_opens() {
        let now = Instant::now();
        let mut c = Connection::new("127.0.0.1:1".parse().unwrap(), [1; 20], 4, now);
        c.on_handshake([1; 20], [2; 20], [3; 20], now).unwrap();
        assert_eq!(c.state, ConnectionState::Open);
    }

    #[test]
    fn handshake_with_mismatched_info_hash_closes() {
        let now = Instant::now();
        let mut c = Connection::new("127.0.0.1:1".parse().unwrap(), [1; 20], 4, now);
        let err = c.on_handshake([9; 20], [2; 20], [3; 20], now).unwrap_err();
        assert!(matches!(err, PeerError::InfoHashMismatch));
        assert_eq!(c.state, ConnectionState::Closed);
    }

    #[test]
    fn self_connection_is_rejected() {
        let now = Instant::now();
        let mut c = Connection::new("127.0.0.1:1".parse().unwrap(), [1; 20], 4, now);
        let err = c.on_handshake([1; 20], [3; 20], [3; 20], now).unwrap_err();
        assert!(matches!(err, PeerError::SelfConnection));
    }

    #[test]
    fn have_sets_bit_within_range() {
        let now = Instant::now();
        let mut c = Connection::new("127.0.0.1:1".parse().unwrap(), [1; 20], 4, now);
        c.on_have(2);
        assert!(c.peer_pieces[2]);
        assert!(!c.peer_pieces[0]);
    }

    #[test]
    fn request_lifecycle_tracks_pending_count() {
        let now = Instant::now();
        let mut c = Connection::new("127.0.0.1:1".parse().unwrap(), [1; 20], 4, now);
        assert_eq!(c.pending_count(), 0);
        c.request_started(0, now);
        c.request_started(1, now);
        assert_eq!(c.pending_count(), 2);
        assert!(c.has_pending(0));
        c.request_resolved(0);
        assert_eq!(c.pending_count(), 1);
        assert!(!c.has_pending(0));
    }

    #[test]
    fn request_started_does_not_duplicate_an_existing_entry() {
        let now = Instant::now();
        let mut c = Connection::new("127.0.0.1:1".parse().unwrap(), [1; 20], 4, now);
        c.request_started(0, now);
        c.request_started(0, now);
        assert_eq!(c.pending_count(), 1);
    }
}
