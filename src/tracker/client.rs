//! Periodic announce client, grounded on the teacher's `Tracker` (same
//! request/respond-with-peers shape) but speaking JSON over POST to match
//! this tracker's HTTP surface instead of bencode over a GET query string.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::{StatusCode, Url};

use crate::error::tracker::{Result, TrackerError};
use crate::observability::{Event, Observability};
use crate::scheduler;
use crate::{InfoHash, PeerId};

use super::wire::{AnnounceRequest, AnnounceResponse};

#[derive(Debug, Clone)]
pub struct ClientConf {
    pub tracker_url: Url,
    pub peer_count: usize,
    pub zone: String,
}

pub struct Client {
    http: reqwest::Client,
    conf: ClientConf,
}

impl Client {
    pub fn new(conf: ClientConf) -> Self {
        Client {
            http: reqwest::Client::new(),
            conf,
        }
    }

    pub async fn announce(
        &self,
        info_hash: InfoHash,
        peer_id: PeerId,
        port: u16,
        complete: bool,
    ) -> Result<AnnounceResponse> {
        let req = AnnounceRequest {
            info_hash,
            peer_id,
            port,
            zone: self.conf.zone.clone(),
            complete,
            peer_count: Some(self.conf.peer_count),
        };

        let resp = self
            .http
            .post(self.conf.tracker_url.clone())
            .json(&req)
            .send()
            .await?;

        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(TrackerError::RateLimited { retry_after_ms });
        }

        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }
}

/// Announces on a fixed interval, feeding discovered peers (or rejection)
/// into the scheduler as [`scheduler::Command`]s. Mirrors the teacher's
/// "announce, then sleep until the tracker-provided interval elapses"
/// loop; `complete` is a flag the caller flips once its torrent finishes,
/// since the client itself has no visibility into torrent state (state
/// lives solely in the scheduler, per the event-loop ownership rule).
pub async fn run_announce_loop(
    client: Arc<Client>,
    scheduler_tx: scheduler::Sender,
    obs: Observability,
    info_hash: InfoHash,
    peer_id: PeerId,
    port: u16,
    complete: Arc<AtomicBool>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let mut interval = Duration::from_secs(30);
    loop {
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let is_complete = complete.load(Ordering::Relaxed);
        match client.announce(info_hash, peer_id, port, is_complete).await {
            Ok(resp) => {
                interval = Duration::from_secs(resp.interval_secs.max(5));
                let peers = resp.peers.into_iter().map(|p| p.addr).collect();
                let _ = scheduler_tx.send(scheduler::Command::PeersDiscovered { info_hash, peers });
            }
            Err(TrackerError::RateLimited { retry_after_ms }) => {
                interval = Duration::from_millis(retry_after_ms);
            }
            Err(_) => {
                obs.emit(Event::TrackerAnnounceRejected { info_hash });
                let _ = scheduler_tx.send(scheduler::Command::TrackerRejected { info_hash });
            }
        }
    }
}
