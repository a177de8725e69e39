//! The events a caller may receive from the scheduler, origin cluster
//! client, and tracker client.
//!
//! Generalizes a torrent-engine "alert" into an [`Observability`] handle:
//! a cheap, cloneable sender created once at process startup and passed
//! down into each component, rather than a process-wide static. Each
//! binary (`blobmesh-origin`, `blobmesh-agent`, `blobmesh-tracker`) owns
//! one channel and decides what to do with events -- log them, export
//! metrics, or both.
//!
//! By default only the events that mark a state transition are emitted;
//! high-frequency ones (e.g. per-piece progress) are opt-in via
//! [`ObservabilityConf`] since they carry non-trivial overhead at scale.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::Error;
use crate::{InfoHash, PieceIndex};

#[derive(Debug, Clone, Default)]
pub struct ObservabilityConf {
    /// Emit an event for every piece that goes clean, not just torrent
    /// completion. Off by default: a large blob can have thousands of
    /// pieces.
    pub piece_events: bool,
}

#[derive(Debug)]
pub enum Event {
    TorrentAnnounced(InfoHash),
    TorrentComplete(InfoHash),
    TorrentExpired(InfoHash),
    PieceClean {
        info_hash: InfoHash,
        index: PieceIndex,
    },
    PeerBlacklisted {
        addr: std::net::IpAddr,
    },
    OriginUploadCommitted {
        digest: crate::digest::Digest,
    },
    OriginFetchFailed {
        digest: crate::digest::Digest,
        status: u16,
    },
    TrackerAnnounceRejected {
        info_hash: InfoHash,
    },
    /// A [`crate::origin::VerificationHook`] rendered a decision on a
    /// committed blob. Advisory only -- emitted for every commit, but
    /// never changes whether the blob is served.
    VerificationAdvisory {
        digest: crate::digest::Digest,
        allowed: bool,
    },
    Error(Error),
}

pub type EventReceiver = UnboundedReceiver<Event>;

/// A cloneable handle for emitting events. Cheap to clone and hold in
/// every long-lived component (scheduler, origin client, tracker client).
#[derive(Clone)]
pub struct Observability {
    tx: UnboundedSender<Event>,
    conf: ObservabilityConf,
}

impl Observability {
    pub fn channel(conf: ObservabilityConf) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Observability { tx, conf }, rx)
    }

    /// Sends an event, silently dropping it if nobody is listening
    /// anymore -- observability must never be allowed to block or panic
    /// the component emitting it.
    pub fn emit(&self, event: Event) {
        if matches!(event, Event::PieceClean { .. }) && !self.conf.piece_events {
            return;
        }
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn piece_events_are_suppressed_by_default() {
        let (obs, mut rx) = Observability::channel(ObservabilityConf::default());
        obs.emit(Event::PieceClean {
            info_hash: [0; 20],
            index: 0,
        });
        obs.emit(Event::TorrentComplete([0; 20]));
        let first = rx.try_recv().unwrap();
        assert!(matches!(first, Event::TorrentComplete(_)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn piece_events_pass_through_when_enabled() {
        let (obs, mut rx) = Observability::channel(ObservabilityConf { piece_events: true });
        obs.emit(Event::PieceClean {
            info_hash: [0; 20],
            index: 3,
        });
        assert!(matches!(rx.try_recv().unwrap(), Event::PieceClean { .. }));
    }
}
