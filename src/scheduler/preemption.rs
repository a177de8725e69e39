//! Demerit tracking and blacklisting for misbehaving or useless peers.
//!
//! A connection accrues a demerit for each fault (hash mismatch, malformed
//! message, inactivity timeout). After the third demerit within the
//! blacklist window, the peer is blacklisted and new connections from it
//! are refused until the window elapses.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

const BLACKLIST_THRESHOLD: usize = 3;

struct Record {
    demerits: usize,
    last_demerit: Instant,
}

pub struct PreemptionTracker {
    records: HashMap<IpAddr, Record>,
    window: Duration,
}

impl PreemptionTracker {
    pub fn new(window: Duration) -> Self {
        PreemptionTracker {
            records: HashMap::new(),
            window,
        }
    }

    /// Records a demerit for `addr`, returning `true` if this pushes it
    /// over the blacklist threshold.
    pub fn demerit(&mut self, addr: IpAddr, now: Instant) -> bool {
        let record = self.records.entry(addr).or_insert(Record {
            demerits: 0,
            last_demerit: now,
        });

        if now.duration_since(record.last_demerit) > self.window {
            record.demerits = 0;
        }
        record.demerits += 1;
        record.last_demerit = now;
        record.demerits >= BLACKLIST_THRESHOLD
    }

    pub fn is_blacklisted(&self, addr: IpAddr, now: Instant) -> bool {
        self.records
            .get(&addr)
            .map(|r| {
                r.demerits >= BLACKLIST_THRESHOLD
                    && now.duration_since(r.last_demerit) <= self.window
            })
            .unwrap_or(false)
    }

    /// Clears expired entries; call this periodically to bound memory.
    pub fn evict_expired(&mut self, now: Instant) {
        self.records
            .retain(|_, r| now.duration_since(r.last_demerit) <= self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn three_demerits_blacklists() {
        let mut t = PreemptionTracker::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(!t.demerit(ip(), now));
        assert!(!t.demerit(ip(), now));
        assert!(t.demerit(ip(), now));
        assert!(t.is_blacklisted(ip(), now));
    }

    #[test]
    fn window_expiry_resets_demerits() {
        let mut t = PreemptionTracker::new(Duration::from_millis(10));
        let now = Instant::now();
        t.demerit(ip(), now);
        t.demerit(ip(), now);
        let later = now + Duration::from_millis(50);
        // window elapsed since last demerit, so this starts a fresh count
        assert!(!t.demerit(ip(), later));
        assert!(!t.is_blacklisted(ip(), later));
    }

    #[test]
    fn unknown_address_is_not_blacklisted() {
        let t = PreemptionTracker::new(Duration::from_secs(60));
        assert!(!t.is_blacklisted(ip(), Instant::now()));
    }
}
