//! The seam spec.md §1 calls out for manifest/signature verification.
//!
//! Kept advisory by default: an origin never withholds a committed blob
//! because a hook denied it. A `deny` decision is logged and nothing
//! else -- making it enforcing (refusing to serve, or rolling back the
//! commit) is left to whatever external manifest-verification
//! collaborator a deployment wires in, per the Non-goal on content
//! inspection.

use crate::digest::Digest;

/// Runs once per committed upload, after the blob has already moved into
/// the cache. A `VerificationHook` may inspect the digest (and in a real
/// deployment, the manifest or signature material a collaborator
/// supplies alongside it) and render a decision, but cannot undo the
/// commit itself.
pub trait VerificationHook: Send + Sync {
    fn verify(&self, digest: Digest) -> VerificationDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationDecision {
    Allow,
    Deny,
}

/// The default hook: allows everything. Verification is off until a
/// deployment supplies its own `VerificationHook`.
pub struct NoopVerificationHook;

impl VerificationHook for NoopVerificationHook {
    fn verify(&self, _digest: Digest) -> VerificationDecision {
        VerificationDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_hook_always_allows() {
        let hook = NoopVerificationHook;
        let digest = Digest::of(b"payload");
        assert_eq!(hook.verify(digest), VerificationDecision::Allow);
    }
}
