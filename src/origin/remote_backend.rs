//! Blob refresh from a remote backend (spec.md §4.6): when an origin lacks
//! a digest locally, it fetches the bytes from wherever they authoritatively
//! live, streams them through the local store's `upload -> download ->
//! cache` transitions, and generates `MetaInfo` on arrival.
//!
//! `RemoteBackend` is the tagged-variant backend the design notes call
//! for in place of the source's dynamic plug-in interface: the router
//! picks one kind at boot from config rather than dispatching through a
//! trait object.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use reqwest::Url;
use tokio::io::AsyncReadExt;

use crate::digest::Digest;
use crate::error::origin::OriginError;
use crate::metainfo::{MetaInfo, PieceLengthPolicy};
use crate::store::LocalStore;

#[derive(Debug, Clone)]
pub enum RemoteBackend {
    /// A sibling filesystem tree, keyed by hex digest -- used in tests and
    /// for single-node deployments seeded from a local mirror.
    LocalFs { root: PathBuf },
    /// A plain HTTP(S) origin serving `{base_url}/{digest}`.
    Http { base_url: Url },
    /// An S3-compatible object store, addressed as
    /// `{base_url}/{bucket}/{digest}` over HTTP.
    ObjectStore { base_url: Url, bucket: String },
}

trait AsyncReadInner: tokio::io::AsyncRead + Unpin + Send {}
impl<T: tokio::io::AsyncRead + Unpin + Send> AsyncReadInner for T {}

impl RemoteBackend {
    async fn open_stream(&self, digest: Digest) -> Result<Box<dyn AsyncReadInner>, OriginError> {
        match self {
            RemoteBackend::LocalFs { root } => {
                let path = root.join(digest.to_hex());
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|_| OriginError::NotFound)?;
                Ok(Box::new(file))
            }
            RemoteBackend::Http { base_url } => {
                let url = base_url
                    .join(&digest.to_hex())
                    .map_err(|_| OriginError::NotFound)?;
                fetch_http_stream(url).await
            }
            RemoteBackend::ObjectStore { base_url, bucket } => {
                let url = base_url
                    .join(&format!("{bucket}/{}", digest.to_hex()))
                    .map_err(|_| OriginError::NotFound)?;
                fetch_http_stream(url).await
            }
        }
    }
}

async fn fetch_http_stream(url: Url) -> Result<Box<dyn AsyncReadInner>, OriginError> {
    let resp = reqwest::get(url).await?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(OriginError::NotFound);
    }
    let resp = resp.error_for_status().map_err(|e| {
        let status = e.status().map(|s| s.as_u16()).unwrap_or(0);
        if (500..600).contains(&status) {
            OriginError::Upstream5xx { status }
        } else {
            OriginError::Rejected { status }
        }
    })?;
    let stream = resp
        .bytes_stream()
        .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
    Ok(Box::new(tokio_util::io::StreamReader::new(stream)))
}

/// Streams `digest` from `backend` into `store`, verifies it hashes to
/// `digest`, generates `MetaInfo`, and promotes it straight to `cache`.
/// Equivalent to spec.md §4.6 steps 2-4 for a single fetch; single-flight
/// coordination across concurrent callers is [`Refresher`]'s job.
pub async fn fetch_and_promote(
    backend: &RemoteBackend,
    store: &LocalStore,
    digest: Digest,
    policy: &PieceLengthPolicy,
    announce_url: Option<String>,
) -> Result<MetaInfo, OriginError> {
    let mut reader = backend.open_stream(digest).await?;

    let upload_id = store
        .create_upload()
        .map_err(|_| OriginError::Upstream5xx { status: 500 })?;
    let mut offset: u64 = 0;
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|_| OriginError::Upstream5xx { status: 502 })?;
        if n == 0 {
            break;
        }
        store
            .write_upload_chunk(&upload_id, offset, &buf[..n])
            .map_err(|_| OriginError::Upstream5xx { status: 500 })?;
        offset += n as u64;
    }

    let upload_path = store.layout().upload_path(upload_id.as_str());
    let actual_digest = crate::store::hash_file(&upload_path)
        .map_err(|_| OriginError::Upstream5xx { status: 500 })?;
    if actual_digest != digest {
        let _ = tokio::fs::remove_file(&upload_path).await;
        return Err(OriginError::Rejected { status: 422 });
    }

    let total_length = offset;
    let piece_length = policy
        .piece_length_for(total_length)
        .map_err(|_| OriginError::Rejected { status: 422 })?;
    let piece_count = crate::metainfo::piece_count(total_length, piece_length);

    store
        .move_upload_to_download(&upload_id, digest, piece_count)
        .map_err(|_| OriginError::Upstream5xx { status: 500 })?;

    let download_path = store.layout().download_path(&digest);
    let file =
        std::fs::File::open(&download_path).map_err(|_| OriginError::Upstream5xx { status: 500 })?;
    let metainfo = MetaInfo::generate(digest, total_length, file, policy, announce_url)
        .map_err(|_| OriginError::Rejected { status: 422 })?;

    store
        .move_download_to_cache(digest, piece_count)
        .map_err(|_| OriginError::Upstream5xx { status: 500 })?;

    Ok(metainfo)
}

type FlightKey = (String, Digest);
type FlightResult = Result<MetaInfo, Arc<OriginError>>;

/// Ensures at most one in-flight fetch per `(namespace, digest)`: a second
/// caller for the same key joins the first caller's future instead of
/// triggering a redundant backend fetch (spec.md §4.6 step 2).
///
/// Always held behind an `Arc` by callers (the origin server state), so
/// the spawned completion task below can clean up its own entry.
#[derive(Default)]
pub struct Refresher {
    inflight: Mutex<HashMap<FlightKey, Shared<BoxFuture<'static, FlightResult>>>>,
}

impl Refresher {
    pub fn new() -> Self {
        Refresher::default()
    }

    /// Returns `true` if a fetch for this key is already running (used by
    /// the origin HTTP handler to decide whether to answer `202`
    /// immediately without blocking on the fetch itself).
    pub fn is_in_flight(&self, namespace: &str, digest: Digest) -> bool {
        self.inflight
            .lock()
            .unwrap()
            .contains_key(&(namespace.to_string(), digest))
    }

    /// Starts the fetch for `(namespace, digest)` if one isn't already
    /// running; a no-op if it is. The fetch runs to completion in the
    /// background regardless of whether any caller awaits it -- callers
    /// observe progress by polling [`Self::is_in_flight`] and
    /// [`LocalStore::has_cached`], matching spec.md's "return 202
    /// immediately" contract.
    pub fn start(self: &Arc<Self>, namespace: &str, digest: Digest, fut: BoxFuture<'static, Result<MetaInfo, OriginError>>) {
        let key = (namespace.to_string(), digest);
        let mut guard = self.inflight.lock().unwrap();
        if guard.contains_key(&key) {
            return;
        }
        let shared: Shared<BoxFuture<'static, FlightResult>> =
            async move { fut.await.map_err(Arc::new) }.boxed().shared();
        guard.insert(key.clone(), shared.clone());
        drop(guard);

        let this = self.clone();
        tokio::spawn(async move {
            let _ = shared.await;
            this.inflight.lock().unwrap().remove(&key);
        });
    }

    /// Waits for the in-flight fetch for `(namespace, digest)` to finish,
    /// if one is running. Returns `None` if no fetch is in flight.
    pub async fn join(&self, namespace: &str, digest: Digest) -> Option<FlightResult> {
        let shared = {
            let guard = self.inflight.lock().unwrap();
            guard.get(&(namespace.to_string(), digest)).cloned()
        }?;
        Some(shared.await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn fetches_from_local_fs_backend_and_generates_metainfo() {
        let remote_dir = tempfile::tempdir().unwrap();
        let data = vec![42u8; 5000];
        let digest = Digest::of(&data);
        let mut f = std::fs::File::create(remote_dir.path().join(digest.to_hex())).unwrap();
        f.write_all(&data).unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(store_dir.path()).unwrap();
        let backend = RemoteBackend::LocalFs {
            root: remote_dir.path().to_path_buf(),
        };
        let policy = PieceLengthPolicy(vec![(u64::MAX, 1024)]);

        let metainfo = fetch_and_promote(&backend, &store, digest, &policy, None)
            .await
            .unwrap();

        assert_eq!(metainfo.digest, digest);
        assert!(store.has_cached(digest));
    }

    #[tokio::test]
    async fn rejects_when_remote_bytes_do_not_match_claimed_digest() {
        let remote_dir = tempfile::tempdir().unwrap();
        let wrong_digest = Digest::of(b"claimed digest, but not what's on disk");
        let mut f = std::fs::File::create(remote_dir.path().join(wrong_digest.to_hex())).unwrap();
        f.write_all(b"totally different bytes").unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(store_dir.path()).unwrap();
        let backend = RemoteBackend::LocalFs {
            root: remote_dir.path().to_path_buf(),
        };
        let policy = PieceLengthPolicy::default();

        let err = fetch_and_promote(&backend, &store, wrong_digest, &policy, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OriginError::Rejected { status: 422 }));
    }

    #[tokio::test]
    async fn single_flight_joins_the_same_fetch() {
        let remote_dir = tempfile::tempdir().unwrap();
        let data = vec![9u8; 4096];
        let digest = Digest::of(&data);
        std::fs::write(remote_dir.path().join(digest.to_hex()), &data).unwrap();

        let store_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(store_dir.path()).unwrap());
        let backend = RemoteBackend::LocalFs {
            root: remote_dir.path().to_path_buf(),
        };
        let policy = PieceLengthPolicy(vec![(u64::MAX, 512)]);

        let refresher = Arc::new(Refresher::new());
        assert!(!refresher.is_in_flight("ns", digest));

        let store2 = store.clone();
        let policy2 = policy.clone();
        refresher.start(
            "ns",
            digest,
            async move { fetch_and_promote(&backend, &store2, digest, &policy2, None).await }.boxed(),
        );
        assert!(refresher.is_in_flight("ns", digest));

        let result = refresher.join("ns", digest).await.unwrap();
        assert!(result.is_ok());
        assert!(!refresher.is_in_flight("ns", digest));
    }
}
