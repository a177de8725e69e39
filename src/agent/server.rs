//! The agent's HTTP surface (spec.md §6): tag resolution and the blob read
//! path that drives a leech through the origin cluster client and the
//! scheduler before it can be streamed back.

use std::collections::HashSet;
use std::io::Read;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::digest::Digest;
use crate::observability::Observability;
use crate::origin::ClusterClient;
use crate::scheduler;
use crate::store::LocalStore;
use crate::tracker::Client as TrackerClient;
use crate::{Bitfield, InfoHash, PeerId};

use super::tags::TagStore;

pub struct AgentState {
    pub store: Arc<LocalStore>,
    pub tags: TagStore,
    pub tracker_client: Arc<TrackerClient>,
    pub origin_client: Arc<ClusterClient>,
    pub scheduler_tx: scheduler::Sender,
    pub client_id: PeerId,
    pub peer_port: u16,
    pub obs: Observability,
    /// Digests with a leech already started, so a burst of requests for
    /// the same blob doesn't fan out into repeated metainfo fetches.
    leeching: Mutex<HashSet<Digest>>,
    /// Keeps each leech's announce loop alive for the life of the process;
    /// dropping the paired sender would tear the loop down immediately.
    announce_keepalive: Mutex<Vec<tokio::sync::oneshot::Sender<()>>>,
}

impl AgentState {
    pub fn new(
        store: Arc<LocalStore>,
        tags: TagStore,
        tracker_client: Arc<TrackerClient>,
        origin_client: Arc<ClusterClient>,
        scheduler_tx: scheduler::Sender,
        client_id: PeerId,
        peer_port: u16,
        obs: Observability,
    ) -> Self {
        AgentState {
            store,
            tags,
            tracker_client,
            origin_client,
            scheduler_tx,
            client_id,
            peer_port,
            obs,
            leeching: Mutex::new(HashSet::new()),
            announce_keepalive: Mutex::new(Vec::new()),
        }
    }
}

pub fn router(state: Arc<AgentState>) -> Router {
    Router::new()
        .route("/tags/:tag", get(get_tag))
        .route("/namespace/:ns/blobs/:digest", get(get_blob))
        .with_state(state)
}

async fn get_tag(State(state): State<Arc<AgentState>>, Path(tag): Path<String>) -> Response {
    match state.tags.resolve(&tag) {
        Ok(Some(digest)) => (StatusCode::OK, digest.to_hex()).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Streams a blob to the caller if it's already cached; otherwise kicks
/// off a leech (metainfo fetch -> scheduler torrent -> tracker announce)
/// and answers `202`, matching the origin's own "come back later" contract
/// for a blob it doesn't have yet (spec.md §4.6 and §2 steps 2-3).
async fn get_blob(
    State(state): State<Arc<AgentState>>,
    Path((ns, digest)): Path<(String, String)>,
) -> Response {
    let Ok(digest) = digest.parse::<Digest>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if let Ok(mut reader) = state.store.get_cache_reader(digest) {
        let mut buf = Vec::new();
        if reader.read_to_end(&mut buf).is_ok() {
            return (StatusCode::OK, buf).into_response();
        }
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    start_leech_if_needed(&state, ns, digest);
    StatusCode::ACCEPTED.into_response()
}

fn start_leech_if_needed(state: &Arc<AgentState>, ns: String, digest: Digest) {
    {
        let mut leeching = state.leeching.lock().unwrap();
        if !leeching.insert(digest) {
            return;
        }
    }

    let state = state.clone();
    tokio::spawn(async move {
        match state.origin_client.get_metainfo(&ns, digest).await {
            Ok(metainfo) => {
                let info_hash = metainfo.info_hash;
                let own_pieces = Bitfield::repeat(false, metainfo.piece_count());
                let _ = state.scheduler_tx.send(scheduler::Command::StartTorrent {
                    metainfo: Arc::new(metainfo),
                    own_pieces,
                });
                spawn_announce_loop(&state, info_hash);
            }
            Err(err) => {
                log::warn!("failed to resolve metainfo for {}: {err}", digest.to_hex());
                state.leeching.lock().unwrap().remove(&digest);
            }
        }
    });
}

fn spawn_announce_loop(state: &Arc<AgentState>, info_hash: InfoHash) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    state.announce_keepalive.lock().unwrap().push(tx);
    let complete = Arc::new(std::sync::atomic::AtomicBool::new(false));
    tokio::spawn(crate::tracker::client::run_announce_loop(
        state.tracker_client.clone(),
        state.scheduler_tx.clone(),
        state.obs.clone(),
        info_hash,
        state.client_id,
        state.peer_port,
        complete,
        rx,
    ));
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::origin::Ring;
    use crate::tracker::ClientConf as TrackerClientConf;

    fn test_state() -> (Arc<AgentState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).unwrap());
        let tags = TagStore::open(dir.path()).unwrap();
        let (scheduler_tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let tracker_client = Arc::new(TrackerClient::new(TrackerClientConf {
            tracker_url: "http://127.0.0.1:1".parse().unwrap(),
            peer_count: 50,
            zone: "test".to_string(),
        }));
        let origin_client = Arc::new(ClusterClient::new(
            Ring::new(vec!["127.0.0.1:7001".to_string()]),
            3,
            Default::default(),
        ));
        let state = Arc::new(AgentState::new(
            store,
            tags,
            tracker_client,
            origin_client,
            scheduler_tx,
            *b"blobmesh-test-agent0",
            6882,
            Observability::channel(Default::default()).0,
        ));
        (state, dir)
    }

    #[tokio::test]
    async fn unknown_tag_is_not_found() {
        let (state, _dir) = test_state();
        let app = router(state);
        let req = Request::get("/tags/latest").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn set_tag_then_get_tag_resolves_it() {
        let (state, _dir) = test_state();
        let digest = Digest::of(b"an image layer");
        state.tags.set("latest", digest).unwrap();
        let app = router(state);

        let req = Request::get("/tags/latest").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), digest.to_hex().as_bytes());
    }

    #[tokio::test]
    async fn get_blob_on_cache_miss_returns_accepted_and_single_flights() {
        let (state, _dir) = test_state();
        let digest = Digest::of(b"not cached yet");
        let app = router(state.clone());

        let first = Request::get(format!("/namespace/ns/blobs/{}", digest.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(first).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let second = Request::get(format!("/namespace/ns/blobs/{}", digest.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(second).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(
            state.leeching.lock().unwrap().contains(&digest),
            "first request should have marked the digest as leeching"
        );
    }

    #[tokio::test]
    async fn get_blob_on_cache_hit_streams_the_body() {
        let (state, _dir) = test_state();
        let data = vec![3u8; 32];
        let digest = Digest::of(&data);
        state.store.create_download(digest, 1).unwrap();
        let piece_sha1: crate::Sha1Hash = {
            use sha1::{Digest as _, Sha1};
            let mut hasher = Sha1::new();
            hasher.update(&data);
            hasher.finalize().into()
        };
        state.store.write_piece(digest, 1, 0, 32, piece_sha1, &data).unwrap();
        state.store.move_download_to_cache(digest, 1).unwrap();

        let app = router(state);
        let req = Request::get(format!("/namespace/ns/blobs/{}", digest.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }
}
