//! Connection capacity control: a global cap, a per-torrent cap, and a
//! score function used to pick an eviction candidate when a more useful
//! peer wants a slot that's already full.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::counter::ThruputCounters;
use crate::InfoHash;

#[derive(Debug, Clone, Copy)]
pub struct CapacityLimits {
    pub max_connections: usize,
    pub max_connections_per_torrent: usize,
}

impl Default for CapacityLimits {
    fn default() -> Self {
        CapacityLimits {
            max_connections: 200,
            max_connections_per_torrent: 50,
        }
    }
}

pub struct CapacityTracker {
    limits: CapacityLimits,
    per_torrent: HashMap<InfoHash, usize>,
    total: usize,
}

impl CapacityTracker {
    pub fn new(limits: CapacityLimits) -> Self {
        CapacityTracker {
            limits,
            per_torrent: HashMap::new(),
            total: 0,
        }
    }

    pub fn has_room(&self, info_hash: InfoHash) -> bool {
        self.total < self.limits.max_connections
            && *self.per_torrent.get(&info_hash).unwrap_or(&0)
                < self.limits.max_connections_per_torrent
    }

    pub fn record_open(&mut self, info_hash: InfoHash) {
        self.total += 1;
        *self.per_torrent.entry(info_hash).or_insert(0) += 1;
    }

    pub fn record_close(&mut self, info_hash: InfoHash) {
        self.total = self.total.saturating_sub(1);
        if let Some(n) = self.per_torrent.get_mut(&info_hash) {
            *n = n.saturating_sub(1);
        }
    }

    /// True once the global cap is reached, regardless of per-torrent room.
    /// Distinguishes "evict anyone" (global cap) from "evict within this
    /// swarm" (per-torrent cap) for the caller driving eviction.
    pub fn is_globally_full(&self) -> bool {
        self.total >= self.limits.max_connections
    }

    /// A higher score means more useful to keep. Weighs download rate most
    /// heavily (this peer is feeding us data), with upload rate and having
    /// many pieces as tie-breakers.
    pub fn score(counters: &ThruputCounters, peer_piece_count: usize) -> f64 {
        counters.download_rate() as f64 * 10.0
            + counters.upload_rate() as f64
            + peer_piece_count as f64 * 0.01
    }

    /// Picks the lowest-scoring connection from `candidates`, the one to
    /// evict to make room for a higher-value incoming connection.
    pub fn pick_eviction<'a>(
        candidates: impl Iterator<Item = (&'a SocketAddr, f64)>,
    ) -> Option<SocketAddr> {
        candidates
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(addr, _)| *addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_per_torrent_cap() {
        let limits = CapacityLimits {
            max_connections: 100,
            max_connections_per_torrent: 2,
        };
        let mut tracker = CapacityTracker::new(limits);
        let hash = [1; 20];
        assert!(tracker.has_room(hash));
        tracker.record_open(hash);
        tracker.record_open(hash);
        assert!(!tracker.has_room(hash));
        tracker.record_close(hash);
        assert!(tracker.has_room(hash));
    }

    #[test]
    fn respects_global_cap_even_under_per_torrent_cap() {
        let limits = CapacityLimits {
            max_connections: 1,
            max_connections_per_torrent: 50,
        };
        let mut tracker = CapacityTracker::new(limits);
        tracker.record_open([1; 20]);
        assert!(!tracker.has_room([2; 20]));
    }

    #[test]
    fn eviction_picks_lowest_score() {
        let a: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let picked = CapacityTracker::pick_eviction(vec![(&a, 5.0), (&b, 1.0)].into_iter());
        assert_eq!(picked, Some(b));
    }

    #[test]
    fn is_globally_full_tracks_the_global_cap_only() {
        let limits = CapacityLimits {
            max_connections: 1,
            max_connections_per_torrent: 50,
        };
        let mut tracker = CapacityTracker::new(limits);
        assert!(!tracker.is_globally_full());
        tracker.record_open([1; 20]);
        assert!(tracker.is_globally_full());
    }

    #[test]
    fn score_weighs_download_rate_over_piece_count() {
        let mut fast = ThruputCounters::new();
        fast.record_download(10_000);
        let slow = ThruputCounters::new();
        assert!(CapacityTracker::score(&fast, 1) > CapacityTracker::score(&slow, 1000));
    }
}
