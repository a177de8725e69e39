//! The origin's HTTP surface (spec.md §6): namespace-scoped blob
//! read/write, the chunked upload protocol, and the internal endpoints
//! other origins and the router use (`locations`, `metainfo`,
//! `peercontext`).

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, head, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::digest::Digest;
use crate::metainfo::{MetaInfo, PieceLengthPolicy};
use crate::observability::{Event, Observability};
use crate::scheduler;
use crate::store::LocalStore;
use crate::tracker::PeerContext;
use crate::{Bitfield, PeerId};

use super::remote_backend::{fetch_and_promote, RemoteBackend, Refresher};
use super::ring::Ring;
use super::verify::{NoopVerificationHook, VerificationDecision, VerificationHook};

pub struct OriginState {
    pub store: Arc<LocalStore>,
    pub policy: PieceLengthPolicy,
    pub ring: Ring,
    pub self_host: String,
    pub backend: RemoteBackend,
    pub refresher: Arc<Refresher>,
    pub scheduler_tx: scheduler::Sender,
    pub client_id: PeerId,
    pub peer_port: u16,
    pub peer_context: PeerContext,
    pub announce_url: Option<String>,
    pub tracker_client: Option<Arc<crate::tracker::Client>>,
    pub obs: Observability,
    pub verification_hook: Arc<dyn VerificationHook>,
    /// Keeps each seeded torrent's announce loop alive for the life of the
    /// process; dropping a sender would tear its loop down immediately.
    announce_keepalive: Mutex<Vec<tokio::sync::oneshot::Sender<()>>>,
}

impl OriginState {
    pub fn new(
        store: Arc<LocalStore>,
        policy: PieceLengthPolicy,
        ring: Ring,
        self_host: String,
        backend: RemoteBackend,
        refresher: Arc<Refresher>,
        scheduler_tx: scheduler::Sender,
        client_id: PeerId,
        peer_port: u16,
        peer_context: PeerContext,
        announce_url: Option<String>,
        tracker_client: Option<Arc<crate::tracker::Client>>,
        obs: Observability,
    ) -> Self {
        OriginState {
            store,
            policy,
            ring,
            self_host,
            backend,
            refresher,
            scheduler_tx,
            client_id,
            peer_port,
            peer_context,
            announce_url,
            tracker_client,
            obs,
            verification_hook: Arc::new(NoopVerificationHook),
            announce_keepalive: Mutex::new(Vec::new()),
        }
    }

    /// Swaps in a non-default verification hook. Used by deployments that
    /// wire in their own manifest-verification collaborator.
    pub fn with_verification_hook(mut self, hook: Arc<dyn VerificationHook>) -> Self {
        self.verification_hook = hook;
        self
    }
}

pub fn router(state: Arc<OriginState>) -> Router {
    Router::new()
        .route("/blobs/:digest/locations", get(locations))
        .route("/internal/namespace/:ns/blobs/:digest", head(head_blob))
        .route("/namespace/:ns/blobs/:digest", get(get_blob))
        .route("/namespace/:ns/blobs/:digest/uploads", post(begin_upload))
        .route(
            "/namespace/:ns/blobs/:digest/uploads/:uid",
            put(commit_upload).patch(upload_chunk),
        )
        .route(
            "/internal/duplicate/namespace/:ns/blobs/:digest/uploads/:uid",
            put(duplicate_commit),
        )
        .route(
            "/internal/namespace/:ns/blobs/:digest/metainfo",
            get(get_metainfo),
        )
        .route("/internal/blobs/:digest/metainfo", post(regenerate_metainfo))
        .route("/internal/blobs/:digest", delete(delete_blob))
        .route("/internal/peercontext", get(peer_context))
        .route(
            "/namespace/:ns/blobs/:digest/remote/:remote_dns",
            post(trigger_remote_replication),
        )
        .route("/forcecleanup", post(force_cleanup))
        .with_state(state)
}

async fn locations(
    State(state): State<Arc<OriginState>>,
    Path(digest): Path<String>,
) -> Response {
    let Ok(digest) = digest.parse::<Digest>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let owners = state.ring.owners(&digest, 3);
    let mut headers = HeaderMap::new();
    headers.insert(
        "Origin-Locations",
        owners.join(",").parse().unwrap_or_else(|_| "".parse().unwrap()),
    );
    (StatusCode::OK, headers).into_response()
}

async fn head_blob(
    State(state): State<Arc<OriginState>>,
    Path((_ns, digest)): Path<(String, String)>,
) -> Response {
    let Ok(digest) = digest.parse::<Digest>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match state.store.get_cache_reader(digest) {
        Ok(reader) => {
            let mut headers = HeaderMap::new();
            if let Ok(len) = reader.len() {
                headers.insert("Content-Length", len.into());
            }
            (StatusCode::OK, headers).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_blob(
    State(state): State<Arc<OriginState>>,
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

    start_refresh_if_needed(&state, &ns, digest);
    StatusCode::ACCEPTED.into_response()
}

/// spec.md §4.6: missing locally -> 202 immediately, single-flight fetch
/// in the background, seed the scheduler once the fetch lands in cache.
fn start_refresh_if_needed(state: &Arc<OriginState>, ns: &str, digest: Digest) {
    if state.refresher.is_in_flight(ns, digest) {
        return;
    }
    let store = state.store.clone();
    let backend = state.backend.clone();
    let policy = state.policy.clone();
    let announce = state.announce_url.clone();

    let fut = Box::pin(async move { fetch_and_promote(&backend, &store, digest, &policy, announce).await });
    state.refresher.start(ns, digest, fut);

    let refresher = state.refresher.clone();
    let ns = ns.to_string();
    let state = state.clone();
    tokio::spawn(async move {
        if let Some(Ok(metainfo)) = refresher.join(&ns, digest).await {
            seed_locally(&state, metainfo);
        } else {
            state.obs.emit(Event::OriginFetchFailed { digest, status: 502 });
        }
    });
}

/// Starts seeding a newly-cached blob: registers it with the scheduler as
/// a complete torrent, and, if a tracker is configured, begins announcing
/// it so agents can discover this origin (spec.md §4.5: an origin is just
/// another always-complete peer from the swarm's point of view).
fn seed_locally(state: &Arc<OriginState>, metainfo: MetaInfo) {
    let own_pieces = Bitfield::repeat(true, metainfo.piece_count());
    let info_hash = metainfo.info_hash;
    let _ = state.scheduler_tx.send(scheduler::Command::StartTorrent {
        metainfo: Arc::new(metainfo),
        own_pieces,
    });
    state.obs.emit(Event::TorrentAnnounced(info_hash));

    if let Some(client) = state.tracker_client.clone() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        state.announce_keepalive.lock().unwrap().push(tx);
        let scheduler_tx = state.scheduler_tx.clone();
        let obs = state.obs.clone();
        let peer_id = state.client_id;
        let peer_port = state.peer_port;
        tokio::spawn(crate::tracker::client::run_announce_loop(
            client,
            scheduler_tx,
            obs,
            info_hash,
            peer_id,
            peer_port,
            Arc::new(std::sync::atomic::AtomicBool::new(true)),
            rx,
        ));
    }
}

async fn begin_upload(
    State(state): State<Arc<OriginState>>,
    Path((_ns, digest)): Path<(String, String)>,
) -> Response {
    if digest.parse::<Digest>().is_err() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    match state.store.create_upload() {
        Ok(uid) => {
            let mut headers = HeaderMap::new();
            headers.insert("Location", uid.as_str().parse().unwrap());
            (StatusCode::ACCEPTED, headers).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn upload_chunk(
    State(state): State<Arc<OriginState>>,
    Path((_ns, _digest, uid)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(offset) = headers
        .get("Content-Range")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_start)
    else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let upload_id = crate::store::UploadId::from(uid);
    match state.store.write_upload_chunk(&upload_id, offset, &body) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn parse_range_start(header: &str) -> Option<u64> {
    header.split('-').next()?.trim().parse().ok()
}

async fn commit_upload(
    State(state): State<Arc<OriginState>>,
    Path((ns, digest, uid)): Path<(String, String, String)>,
) -> Response {
    commit(&state, &ns, &digest, &uid).await
}

#[derive(Deserialize)]
struct DuplicateCommit {
    /// Relative nanoseconds from the time of this call (see DESIGN.md's
    /// resolution of the source's ambiguous duration unit).
    delay: u64,
}

async fn duplicate_commit(
    State(state): State<Arc<OriginState>>,
    Path((ns, digest, uid)): Path<(String, String, String)>,
    Json(body): Json<DuplicateCommit>,
) -> Response {
    tokio::time::sleep(Duration::from_nanos(body.delay)).await;
    commit(&state, &ns, &digest, &uid).await
}

async fn commit(state: &Arc<OriginState>, ns: &str, digest: &str, uid: &str) -> Response {
    let Ok(digest) = digest.parse::<Digest>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.store.has_cached(digest) {
        return StatusCode::CONFLICT.into_response();
    }

    let upload_id = crate::store::UploadId::from(uid.to_string());
    let upload_path = state.store.layout().upload_path(upload_id.as_str());
    let Ok(actual_digest) = crate::store::hash_file(&upload_path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if actual_digest != digest {
        return (StatusCode::UNPROCESSABLE_ENTITY, "digest mismatch").into_response();
    }

    let Ok(meta) = std::fs::metadata(&upload_path) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let total_length = meta.len();
    let Ok(piece_length) = state.policy.piece_length_for(total_length) else {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    };
    let piece_count = crate::metainfo::piece_count(total_length, piece_length);

    if state
        .store
        .move_upload_to_download(&upload_id, digest, piece_count)
        .is_err()
    {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let download_path = state.store.layout().download_path(&digest);
    let Ok(file) = std::fs::File::open(&download_path) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let Ok(metainfo) =
        MetaInfo::generate(digest, total_length, file, &state.policy, state.announce_url.clone())
    else {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    };

    if state.store.move_download_to_cache(digest, piece_count).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    state.obs.emit(Event::OriginUploadCommitted { digest });
    let allowed = state.verification_hook.verify(digest) == VerificationDecision::Allow;
    state.obs.emit(Event::VerificationAdvisory { digest, allowed });
    seed_locally(state, metainfo);
    let _ = ns;
    StatusCode::CREATED.into_response()
}

async fn get_metainfo(
    State(state): State<Arc<OriginState>>,
    Path((_ns, digest)): Path<(String, String)>,
) -> Response {
    let Ok(digest) = digest.parse::<Digest>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if !state.store.has_cached(digest) {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Ok(mut reader) = state.store.get_cache_reader(digest) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut buf = Vec::new();
    if reader.read_to_end(&mut buf).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    match MetaInfo::generate(digest, buf.len() as u64, buf.as_slice(), &state.policy, state.announce_url.clone()) {
        Ok(metainfo) => match metainfo.serialize() {
            Ok(bytes) => (StatusCode::OK, bytes).into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Deserialize)]
struct RegenerateQuery {
    piece_length: u32,
}

async fn regenerate_metainfo(
    State(state): State<Arc<OriginState>>,
    Path(digest): Path<String>,
    Query(q): Query<RegenerateQuery>,
) -> Response {
    let Ok(digest) = digest.parse::<Digest>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let Ok(mut reader) = state.store.get_cache_reader(digest) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut buf = Vec::new();
    if reader.read_to_end(&mut buf).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let policy = PieceLengthPolicy(vec![(u64::MAX, q.piece_length)]);
    match MetaInfo::generate(digest, buf.len() as u64, buf.as_slice(), &policy, state.announce_url.clone()) {
        Ok(metainfo) => match metainfo.serialize() {
            Ok(bytes) => (StatusCode::OK, bytes).into_response(),
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Err(_) => StatusCode::UNPROCESSABLE_ENTITY.into_response(),
    }
}

async fn delete_blob(State(state): State<Arc<OriginState>>, Path(digest): Path<String>) -> Response {
    let Ok(digest) = digest.parse::<Digest>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    match state.store.move_cache_to_trash(digest) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn peer_context(State(state): State<Arc<OriginState>>) -> Response {
    Json(state.peer_context.clone()).into_response()
}

async fn trigger_remote_replication(
    State(state): State<Arc<OriginState>>,
    Path((ns, digest, remote_dns)): Path<(String, String, String)>,
) -> Response {
    let Ok(digest) = digest.parse::<Digest>() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if !state.store.has_cached(digest) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let cache_path = state.store.layout().cache_path(&digest);
    tokio::spawn(async move {
        let ring = Ring::new(vec![remote_dns]);
        let client = super::client::ClusterClient::new(ring, 1, super::client::RetryPolicy::default());
        if let Ok(file) = std::fs::File::open(&cache_path) {
            if let Ok(len) = file.metadata().map(|m| m.len()) {
                let _ = client.upload_blob(&ns, digest, len, file).await;
            }
        }
    });
    StatusCode::ACCEPTED.into_response()
}

#[derive(Deserialize)]
struct ForceCleanupQuery {
    #[serde(default)]
    ttl_hr: Option<u64>,
}

async fn force_cleanup(
    State(state): State<Arc<OriginState>>,
    Query(q): Query<ForceCleanupQuery>,
) -> Response {
    let _ = q.ttl_hr;
    match state.store.empty_trash() {
        Ok(removed) => (StatusCode::OK, format!("removed {removed} blobs")).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::origin::remote_backend::RemoteBackend;
    use crate::tracker::PeerContext;

    fn build_state(hook: Option<Arc<dyn VerificationHook>>) -> (Arc<OriginState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).unwrap());
        let (scheduler_tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let peer_context = PeerContext {
            peer_id: *b"blobmesh-test-origin",
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7001),
            zone: "test".to_string(),
            cluster: "test".to_string(),
            origin: true,
        };
        let mut state = OriginState::new(
            store,
            PieceLengthPolicy::default(),
            Ring::new(vec!["127.0.0.1:7001".to_string()]),
            "127.0.0.1:7001".to_string(),
            RemoteBackend::LocalFs { root: dir.path().join("remote-mirror") },
            Arc::new(Refresher::new()),
            scheduler_tx,
            *b"blobmesh-test-origin",
            6881,
            peer_context,
            None,
            None,
            Observability::channel(Default::default()).0,
        );
        if let Some(hook) = hook {
            state = state.with_verification_hook(hook);
        }
        (Arc::new(state), dir)
    }

    fn test_state() -> (Arc<OriginState>, tempfile::TempDir) {
        build_state(None)
    }

    #[tokio::test]
    async fn get_blob_on_cache_miss_returns_accepted() {
        let (state, _dir) = test_state();
        let digest = Digest::of(b"not cached yet");
        let app = router(state);

        let req = Request::get(format!("/namespace/ns/blobs/{}", digest.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn upload_then_commit_then_get_blob_roundtrips() {
        let (state, _dir) = test_state();
        let data = vec![11u8; 4096];
        let digest = Digest::of(&data);
        let app = router(state.clone());

        let begin = Request::post(format!("/namespace/ns/blobs/{}/uploads", digest.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(begin).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let uid = resp
            .headers()
            .get("Location")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let chunk = Request::patch(format!(
            "/namespace/ns/blobs/{}/uploads/{uid}",
            digest.to_hex()
        ))
        .header("Content-Range", "0-4095")
        .body(Body::from(data.clone()))
        .unwrap();
        let resp = app.clone().oneshot(chunk).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let commit = Request::put(format!(
            "/namespace/ns/blobs/{}/uploads/{uid}",
            digest.to_hex()
        ))
        .body(Body::empty())
        .unwrap();
        let resp = app.clone().oneshot(commit).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let get = Request::get(format!("/namespace/ns/blobs/{}", digest.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(get).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn commit_rejects_digest_mismatch() {
        let (state, _dir) = test_state();
        let claimed = Digest::of(b"claimed");
        let app = router(state.clone());

        let begin = Request::post(format!("/namespace/ns/blobs/{}/uploads", claimed.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(begin).await.unwrap();
        let uid = resp
            .headers()
            .get("Location")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let chunk = Request::patch(format!("/namespace/ns/blobs/{}/uploads/{uid}", claimed.to_hex()))
            .header("Content-Range", "0-6")
            .body(Body::from("mismatch"))
            .unwrap();
        app.clone().oneshot(chunk).await.unwrap();

        let commit = Request::put(format!("/namespace/ns/blobs/{}/uploads/{uid}", claimed.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(commit).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn commit_runs_the_verification_hook_but_still_serves_the_blob() {
        struct DenyEverything;
        impl VerificationHook for DenyEverything {
            fn verify(&self, _digest: Digest) -> VerificationDecision {
                VerificationDecision::Deny
            }
        }

        let (state, _dir) = build_state(Some(Arc::new(DenyEverything)));
        let data = vec![5u8; 64];
        let digest = Digest::of(&data);
        let app = router(state);

        let begin = Request::post(format!("/namespace/ns/blobs/{}/uploads", digest.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(begin).await.unwrap();
        let uid = resp.headers().get("Location").unwrap().to_str().unwrap().to_string();

        let chunk = Request::patch(format!("/namespace/ns/blobs/{}/uploads/{uid}", digest.to_hex()))
            .header("Content-Range", "0-63")
            .body(Body::from(data))
            .unwrap();
        app.clone().oneshot(chunk).await.unwrap();

        let commit = Request::put(format!("/namespace/ns/blobs/{}/uploads/{uid}", digest.to_hex()))
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(commit).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED, "a deny decision is advisory, not enforcing");
    }
}
