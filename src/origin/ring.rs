//! Consistent-hash ring over the current origin hosts (spec.md §4.5):
//! rendezvous (highest-random-weight) hashing, so every origin in the
//! cluster can compute the same ownership list for a digest without any
//! shared coordination state.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::digest::Digest;

/// Maps digests to an ordered list of owning origin hosts. `DefaultHasher`
/// is used deliberately instead of the process-randomized `RandomState`:
/// every origin process must derive the identical ranking for the same
/// digest, which requires a hash that is deterministic across processes.
#[derive(Debug, Clone)]
pub struct Ring {
    hosts: Vec<String>,
}

impl Ring {
    pub fn new(hosts: Vec<String>) -> Self {
        Ring { hosts }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// The `k` hosts that own `digest`, in the order callers should try
    /// them (spec.md §4.5: "on 5xx or network error they try the next").
    pub fn owners(&self, digest: &Digest, k: usize) -> Vec<String> {
        let mut scored: Vec<(u64, &String)> =
            self.hosts.iter().map(|host| (weight(host, digest), host)).collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().take(k).map(|(_, host)| host.clone()).collect()
    }

    pub fn is_owner(&self, host: &str, digest: &Digest, k: usize) -> bool {
        self.owners(digest, k).iter().any(|h| h == host)
    }
}

fn weight(host: &str, digest: &Digest) -> u64 {
    let mut hasher = DefaultHasher::new();
    host.hash(&mut hasher);
    digest.as_bytes().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranking_is_deterministic_and_independent_of_host_order() {
        let digest = Digest::of(b"some blob contents");
        let ring_a = Ring::new(vec!["origin-1".into(), "origin-2".into(), "origin-3".into()]);
        let ring_b = Ring::new(vec!["origin-3".into(), "origin-1".into(), "origin-2".into()]);
        assert_eq!(ring_a.owners(&digest, 2), ring_b.owners(&digest, 2));
    }

    #[test]
    fn owners_are_capped_at_k_and_drawn_from_hosts() {
        let digest = Digest::of(b"another blob");
        let hosts = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let ring = Ring::new(hosts.clone());
        let owners = ring.owners(&digest, 3);
        assert_eq!(owners.len(), 3);
        for o in &owners {
            assert!(hosts.contains(o));
        }
    }

    #[test]
    fn adding_a_host_does_not_reshuffle_most_existing_owners() {
        let digest = Digest::of(b"stability under growth");
        let hosts: Vec<String> = (0..10).map(|i| format!("origin-{i}")).collect();
        let before = Ring::new(hosts.clone()).owners(&digest, 3);

        let mut grown = hosts.clone();
        grown.push("origin-10".into());
        let after = Ring::new(grown).owners(&digest, 3);

        let kept = before.iter().filter(|h| after.contains(h)).count();
        assert!(kept >= 2, "expected rendezvous hashing to keep most owners stable");
    }
}
