//! Rarest-first piece selection, with an endgame mode that allows
//! duplicate in-flight requests for the last few pieces so a slow peer
//! can't stall completion.

use std::collections::HashMap;

use crate::{Bitfield, PieceIndex};

/// Below this many missing pieces, the picker allows the same piece to be
/// requested from more than one peer at once (the first to answer wins).
const ENDGAME_THRESHOLD: usize = 4;

pub struct PiecePicker {
    piece_count: usize,
    /// `Clean` in the local store; never re-requested.
    have: Bitfield,
    /// How many connected peers advertise each piece, used to prioritize
    /// the rarest pieces first.
    availability: Vec<usize>,
    /// Pieces already requested from some peer and not yet resolved.
    in_flight: HashMap<PieceIndex, usize>,
}

impl PiecePicker {
    pub fn new(piece_count: usize, have: Bitfield) -> Self {
        PiecePicker {
            piece_count,
            have,
            availability: vec![0; piece_count],
            in_flight: HashMap::new(),
        }
    }

    /// The pieces this side already holds `Clean`, sent to a peer right
    /// after a handshake completes.
    pub fn have(&self) -> &Bitfield {
        &self.have
    }

    pub fn missing_count(&self) -> usize {
        self.have.iter().filter(|b| !**b).count()
    }

    fn in_endgame(&self) -> bool {
        self.missing_count() <= ENDGAME_THRESHOLD && self.missing_count() > 0
    }

    pub fn add_peer_bitfield(&mut self, bitfield: &Bitfield) {
        for (i, has) in bitfield.iter().enumerate().take(self.piece_count) {
            if *has {
                self.availability[i] += 1;
            }
        }
    }

    pub fn remove_peer_bitfield(&mut self, bitfield: &Bitfield) {
        for (i, has) in bitfield.iter().enumerate().take(self.piece_count) {
            if *has {
                self.availability[i] = self.availability[i].saturating_sub(1);
            }
        }
    }

    pub fn on_have(&mut self, index: PieceIndex) {
        if index < self.piece_count {
            self.availability[index] += 1;
        }
    }

    pub fn on_piece_clean(&mut self, index: PieceIndex) {
        if index < self.have.len() {
            self.have.set(index, true);
        }
        self.in_flight.remove(&index);
    }

    /// Picks the rarest piece the given peer has that we don't, preferring
    /// one with no outstanding requests, falling back to endgame
    /// duplication once few pieces remain.
    pub fn pick_for_peer(&mut self, peer_pieces: &Bitfield) -> Option<PieceIndex> {
        let endgame = self.in_endgame();

        let mut best: Option<(PieceIndex, usize)> = None;
        for index in 0..self.piece_count {
            if self.have.get(index).map(|b| *b).unwrap_or(false) {
                continue;
            }
            if !peer_pieces.get(index).map(|b| *b).unwrap_or(false) {
                continue;
            }
            let already_requested = self.in_flight.contains_key(&index);
            if already_requested && !endgame {
                continue;
            }
            let rarity = self.availability[index];
            if best.map(|(_, r)| rarity < r).unwrap_or(true) {
                best = Some((index, rarity));
            }
        }

        if let Some((index, _)) = best {
            *self.in_flight.entry(index).or_insert(0) += 1;
        }
        best.map(|(index, _)| index)
    }

    pub fn cancel_request(&mut self, index: PieceIndex) {
        if let Some(n) = self.in_flight.get_mut(&index) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.in_flight.remove(&index);
            }
        }
    }

    /// Bumps the in-flight count for `index` without running the normal
    /// rarest/already-requested selection, for preemption re-issuing a
    /// request on a second connection. Balanced by a matching
    /// `cancel_request` once the piece resolves.
    pub fn note_duplicate_request(&mut self, index: PieceIndex) {
        *self.in_flight.entry(index).or_insert(0) += 1;
    }

    /// True if this peer is the only connected source for some piece we're
    /// still missing, the condition under which it must not be evicted for
    /// capacity even if it scores lowest.
    pub fn is_sole_source(&self, peer_pieces: &Bitfield) -> bool {
        for index in 0..self.piece_count {
            if self.have.get(index).map(|b| *b).unwrap_or(false) {
                continue;
            }
            if peer_pieces.get(index).map(|b| *b).unwrap_or(false) && self.availability[index] <= 1
            {
                return true;
            }
        }
        false
    }

    pub fn is_complete(&self) -> bool {
        self.missing_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bf(bits: &[bool]) -> Bitfield {
        Bitfield::from_iter(bits.iter().copied())
    }

    #[test]
    fn picks_rarest_available_piece() {
        let mut picker = PiecePicker::new(3, bf(&[false, false, false]));
        picker.add_peer_bitfield(&bf(&[true, true, true]));
        picker.add_peer_bitfield(&bf(&[true, false, false]));
        picker.add_peer_bitfield(&bf(&[true, false, false]));
        // piece 0 availability 3, piece 1 availability 1, piece 2 availability 1
        let peer_has = bf(&[true, true, true]);
        let picked = picker.pick_for_peer(&peer_has).unwrap();
        assert!(picked == 1 || picked == 2);
    }

    #[test]
    fn does_not_pick_pieces_already_clean() {
        let mut picker = PiecePicker::new(2, bf(&[true, false]));
        let peer_has = bf(&[true, true]);
        assert_eq!(picker.pick_for_peer(&peer_has), Some(1));
    }

    #[test]
    fn avoids_duplicate_requests_outside_endgame() {
        let mut picker = PiecePicker::new(10, Bitfield::repeat(false, 10));
        let peer_has = Bitfield::repeat(true, 10);
        let first = picker.pick_for_peer(&peer_has).unwrap();
        // request every other piece too so only the endgame window remains
        for _ in 0..8 {
            picker.pick_for_peer(&peer_has);
        }
        // with 9 outstanding and not yet endgame (missing_count is still 10,
        // since none are clean), picking again should avoid `first`
        let next = picker.pick_for_peer(&peer_has).unwrap();
        assert_ne!(first, next);
    }

    #[test]
    fn endgame_allows_duplicate_requests() {
        let mut picker = PiecePicker::new(2, bf(&[true, false]));
        let peer_has = bf(&[true, true]);
        let first = picker.pick_for_peer(&peer_has).unwrap();
        let second = picker.pick_for_peer(&peer_has).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn on_piece_clean_marks_complete() {
        let mut picker = PiecePicker::new(1, Bitfield::repeat(false, 1));
        assert!(!picker.is_complete());
        picker.on_piece_clean(0);
        assert!(picker.is_complete());
    }

    #[test]
    fn remove_peer_bitfield_decrements_availability() {
        let mut picker = PiecePicker::new(2, bf(&[false, false]));
        picker.add_peer_bitfield(&bf(&[true, true]));
        picker.add_peer_bitfield(&bf(&[true, false]));
        assert_eq!(picker.availability, vec![2, 1]);
        picker.remove_peer_bitfield(&bf(&[true, false]));
        assert_eq!(picker.availability, vec![1, 1]);
    }

    #[test]
    fn remove_peer_bitfield_does_not_go_negative() {
        let mut picker = PiecePicker::new(1, bf(&[false]));
        picker.remove_peer_bitfield(&bf(&[true]));
        assert_eq!(picker.availability, vec![0]);
    }

    #[test]
    fn sole_source_blocks_eviction() {
        let mut picker = PiecePicker::new(2, bf(&[false, false]));
        // only one peer advertises piece 1
        picker.add_peer_bitfield(&bf(&[true, true]));
        picker.add_peer_bitfield(&bf(&[true, false]));
        assert!(picker.is_sole_source(&bf(&[false, true])));
        assert!(!picker.is_sole_source(&bf(&[true, false])));
    }

    #[test]
    fn note_duplicate_request_is_balanced_by_cancel() {
        let mut picker = PiecePicker::new(4, Bitfield::repeat(false, 4));
        let peer_has = Bitfield::repeat(true, 4);
        let index = picker.pick_for_peer(&peer_has).unwrap();
        picker.note_duplicate_request(index);
        // two outstanding requests for the same piece; both must resolve
        // before it's droppable from in-flight bookkeeping.
        picker.cancel_request(index);
        assert!(picker.in_flight.contains_key(&index));
        picker.cancel_request(index);
        assert!(!picker.in_flight.contains_key(&index));
    }
}
