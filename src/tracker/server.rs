//! The tracker's HTTP surface: an `/announce` endpoint with admission
//! control and zone-aware peer sampling, backed by a purely in-memory
//! swarm table (spec.md §4.4 -- the tracker persists nothing; a restart
//! recovers as peers re-announce).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rand::seq::SliceRandom;

use crate::observability::{Event, Observability};
use crate::{InfoHash, PeerId};

use super::wire::{AnnounceRequest, AnnounceResponse, PeerAddr};

#[derive(Debug, Clone)]
pub struct ServerConf {
    /// Entries older than this are swept from the swarm table.
    pub peer_ttl: Duration,
    /// Upper bound on peers returned per announce, regardless of the
    /// caller's requested `peer_count`.
    pub max_peers_per_response: usize,
    /// Target fraction of a response drawn from the requester's own zone
    /// before falling back to cross-zone peers.
    pub same_zone_ratio: f64,
    /// Admission-control window for the per-infohash, per-source-IP rate
    /// limit.
    pub rate_limit_window: Duration,
    /// Max announces from one source IP for one infohash within the
    /// window before a 429 is returned.
    pub rate_limit_max: u32,
    /// How often the eviction sweep runs.
    pub sweep_interval: Duration,
    /// Interval handed back to callers in [`AnnounceResponse::interval_secs`],
    /// telling them when to announce again.
    pub announce_interval: Duration,
}

impl Default for ServerConf {
    fn default() -> Self {
        ServerConf {
            peer_ttl: Duration::from_secs(30 * 60),
            max_peers_per_response: 50,
            same_zone_ratio: 0.7,
            rate_limit_window: Duration::from_secs(10),
            rate_limit_max: 5,
            sweep_interval: Duration::from_secs(60),
            announce_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct SwarmEntry {
    addr: SocketAddr,
    zone: String,
    complete: bool,
    last_seen: Instant,
    /// Origin seeders are pre-registered and never expire on `PeerTTL`.
    permanent: bool,
}

#[derive(Default)]
struct RateWindow {
    count: u32,
    window_start: Option<Instant>,
}

struct Inner {
    conf: ServerConf,
    swarms: Mutex<HashMap<InfoHash, HashMap<PeerId, SwarmEntry>>>,
    rate: Mutex<HashMap<(InfoHash, IpAddr), RateWindow>>,
    obs: Observability,
}

/// Shared, cloneable handle to the tracker's in-memory state. Cheap to
/// clone (an `Arc` inside) so it can be the axum router's state type.
#[derive(Clone)]
pub struct Tracker(Arc<Inner>);

impl Tracker {
    pub fn new(conf: ServerConf, obs: Observability) -> Self {
        Tracker(Arc::new(Inner {
            conf,
            swarms: Mutex::new(HashMap::new()),
            rate: Mutex::new(HashMap::new()),
            obs,
        }))
    }

    /// Registers a permanent entry for an origin seeder. Origins call this
    /// once at boot for every torrent they seed; permanent entries are
    /// always included in announce responses and survive the TTL sweep.
    pub fn register_origin(&self, info_hash: InfoHash, peer_id: PeerId, addr: SocketAddr, zone: String) {
        let mut swarms = self.0.swarms.lock().unwrap();
        swarms.entry(info_hash).or_default().insert(
            peer_id,
            SwarmEntry {
                addr,
                zone,
                complete: true,
                last_seen: Instant::now(),
                permanent: true,
            },
        );
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/announce", post(announce))
            .with_state(self)
    }

    /// Spawns the periodic sweep that evicts entries older than `peer_ttl`.
    /// Permanent (origin) entries are never evicted.
    pub fn spawn_eviction_sweep(&self) -> tokio::task::JoinHandle<()> {
        let inner = self.0.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.conf.sweep_interval);
            loop {
                ticker.tick().await;
                let ttl = inner.conf.peer_ttl;
                let now = Instant::now();
                let mut swarms = inner.swarms.lock().unwrap();
                swarms.retain(|_, peers| {
                    peers.retain(|_, entry| entry.permanent || now.duration_since(entry.last_seen) < ttl);
                    !peers.is_empty()
                });
            }
        })
    }

    fn check_rate_limit(&self, info_hash: InfoHash, source: IpAddr) -> Result<(), Duration> {
        let mut rate = self.0.rate.lock().unwrap();
        let window = rate.entry((info_hash, source)).or_default();
        let now = Instant::now();
        let elapsed = window
            .window_start
            .map(|start| now.duration_since(start))
            .unwrap_or(self.0.conf.rate_limit_window);
        if elapsed >= self.0.conf.rate_limit_window {
            window.window_start = Some(now);
            window.count = 1;
            return Ok(());
        }
        window.count += 1;
        if window.count > self.0.conf.rate_limit_max {
            let retry_after = self.0.conf.rate_limit_window - elapsed;
            return Err(retry_after);
        }
        Ok(())
    }

    fn upsert_and_sample(&self, req: &AnnounceRequest, source_ip: IpAddr) -> AnnounceResponse {
        let addr = SocketAddr::new(source_ip, req.port);
        let conf = self.0.conf.clone();
        let mut swarms = self.0.swarms.lock().unwrap();
        let peers = swarms.entry(req.info_hash).or_default();
        peers.insert(
            req.peer_id,
            SwarmEntry {
                addr,
                zone: req.zone.clone(),
                complete: req.complete,
                last_seen: Instant::now(),
                permanent: false,
            },
        );

        let wanted = req
            .peer_count
            .map(|n| n.min(conf.max_peers_per_response))
            .unwrap_or(conf.max_peers_per_response);

        let mut same_zone: Vec<PeerAddr> = Vec::new();
        let mut cross_zone: Vec<PeerAddr> = Vec::new();
        let mut permanent: Vec<PeerAddr> = Vec::new();
        for (peer_id, entry) in peers.iter() {
            if *peer_id == req.peer_id {
                continue;
            }
            let candidate = PeerAddr {
                addr: entry.addr,
                zone: entry.zone.clone(),
            };
            if entry.permanent {
                permanent.push(candidate);
            } else if entry.zone == req.zone {
                same_zone.push(candidate);
            } else {
                cross_zone.push(candidate);
            }
        }

        let mut rng = rand::thread_rng();
        same_zone.shuffle(&mut rng);
        cross_zone.shuffle(&mut rng);

        // Origin seeders are always included and don't count against the
        // requested budget; same-zone/cross-zone sampling fills the rest.
        let same_zone_budget = ((wanted as f64) * conf.same_zone_ratio).round() as usize;
        let mut sampled = permanent;
        let mut rest: Vec<PeerAddr> = same_zone.into_iter().take(same_zone_budget).collect();
        let remaining = wanted.saturating_sub(rest.len());
        rest.extend(cross_zone.into_iter().take(remaining));
        rest.truncate(wanted);
        sampled.extend(rest);

        AnnounceResponse {
            peers: sampled,
            interval_secs: conf.announce_interval.as_secs(),
        }
    }
}

async fn announce(
    State(tracker): State<Tracker>,
    ConnectInfo(source): ConnectInfo<SocketAddr>,
    Json(req): Json<AnnounceRequest>,
) -> Response {
    if let Err(retry_after) = tracker.check_rate_limit(req.info_hash, source.ip()) {
        tracker.0.obs.emit(Event::TrackerAnnounceRejected {
            info_hash: req.info_hash,
        });
        let mut headers = HeaderMap::new();
        headers.insert(
            "Retry-After",
            HeaderValue::from_str(&retry_after.as_secs().to_string()).unwrap(),
        );
        return (StatusCode::TOO_MANY_REQUESTS, headers, "rate limited").into_response();
    }

    let resp = tracker.upsert_and_sample(&req, source.ip());
    Json(resp).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::ObservabilityConf;

    fn req(info_hash: InfoHash, peer_id: PeerId, zone: &str) -> AnnounceRequest {
        AnnounceRequest {
            info_hash,
            peer_id,
            port: 6890,
            zone: zone.to_string(),
            complete: false,
            peer_count: Some(10),
        }
    }

    #[test]
    fn announce_upserts_and_excludes_self() {
        let (obs, _rx) = Observability::channel(ObservabilityConf::default());
        let tracker = Tracker::new(ServerConf::default(), obs);
        let ih = [1u8; 20];

        let resp1 = tracker.upsert_and_sample(&req(ih, [1u8; 20], "z1"), "10.0.0.1".parse().unwrap());
        assert!(resp1.peers.is_empty());

        let resp2 = tracker.upsert_and_sample(&req(ih, [2u8; 20], "z1"), "10.0.0.2".parse().unwrap());
        assert_eq!(resp2.peers.len(), 1);
        assert_eq!(resp2.peers[0].addr.ip().to_string(), "10.0.0.1");
    }

    #[test]
    fn origin_peers_are_permanent_and_always_included() {
        let (obs, _rx) = Observability::channel(ObservabilityConf::default());
        let tracker = Tracker::new(ServerConf::default(), obs);
        let ih = [3u8; 20];
        let origin_id = [9u8; 20];
        tracker.register_origin(ih, origin_id, "10.0.0.9:6890".parse().unwrap(), "z1".into());

        let resp = tracker.upsert_and_sample(&req(ih, [4u8; 20], "z2"), "10.0.0.4".parse().unwrap());
        assert!(resp.peers.iter().any(|p| p.addr.ip().to_string() == "10.0.0.9"));
    }

    #[test]
    fn rate_limit_trips_after_max_announces() {
        let (obs, _rx) = Observability::channel(ObservabilityConf::default());
        let mut conf = ServerConf::default();
        conf.rate_limit_max = 2;
        let tracker = Tracker::new(conf, obs);
        let ih = [5u8; 20];
        let source: IpAddr = "10.0.0.5".parse().unwrap();

        assert!(tracker.check_rate_limit(ih, source).is_ok());
        assert!(tracker.check_rate_limit(ih, source).is_ok());
        assert!(tracker.check_rate_limit(ih, source).is_err());
    }
}
