//! The origin cluster client (spec.md §4.5): hides blob sharding behind a
//! consistent-hash ring, retries/fails over per a single retry-policy
//! object, and drives the chunked-upload protocol.
//!
//! Grounded on the teacher's `Tracker` client in shape (one `reqwest`
//! client wrapping a base URL, one method per RPC) but generalized per the
//! design notes: retries scattered across HTTP helpers become one
//! `RetryPolicy` object shared by every call.

use std::io::{Read, Seek, SeekFrom};
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use reqwest::{Client as HttpClient, StatusCode};

use crate::digest::Digest;
use crate::error::origin::OriginError;
use crate::metainfo::MetaInfo;
use crate::tracker::PeerContext;

use super::ring::Ring;

/// How a call classifies a response: keep polling the same owner, try the
/// next owner, or hand the error straight back to the caller. Carries
/// `{initial, max, cap, jitter, classifier}` as one object per the design
/// notes, rather than retry logic duplicated at each call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub cap: Duration,
    pub budget: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    /// spec.md §4.5 polling contract: "initial ~1s, cap ~5s, total budget
    /// ~15 min".
    fn default() -> Self {
        RetryPolicy {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(5),
            budget: Duration::from_secs(15 * 60),
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A `202`: poll the *same* owner again after backing off. A 202 must
    /// never cause failover (spec.md §4.5).
    RetrySameOwner,
    /// A `5xx` or network error: try the next owner in ring order.
    Failover,
    /// A `4xx` (not 404/409/202): surface to the caller immediately.
    Surface,
}

impl RetryPolicy {
    fn classify(err: &OriginError) -> Disposition {
        match err {
            OriginError::Preparing => Disposition::RetrySameOwner,
            OriginError::Upstream5xx { .. } | OriginError::Http(_) => Disposition::Failover,
            _ => Disposition::Surface,
        }
    }

    fn backoff_after(&self, attempt: u32) -> Duration {
        let exp = self.initial.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = exp.min(self.cap.as_millis() as f64);
        let jitter_span = capped * self.jitter;
        let jittered = capped + rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

pub struct ClusterClient {
    http: HttpClient,
    ring: Ring,
    /// Number of owners consulted per digest (K >= 3 recommended).
    k: usize,
    retry: RetryPolicy,
}

impl ClusterClient {
    pub fn new(ring: Ring, k: usize, retry: RetryPolicy) -> Self {
        ClusterClient {
            http: HttpClient::new(),
            ring,
            k,
            retry,
        }
    }

    pub fn owners_for(&self, digest: &Digest) -> Vec<String> {
        self.ring.owners(digest, self.k)
    }

    /// Polls owners in ring order for `GetMetaInfo`, applying the 202/5xx/4xx
    /// disposition at each step (spec.md §4.5).
    pub async fn get_metainfo(&self, namespace: &str, digest: Digest) -> Result<MetaInfo, OriginError> {
        self.poll_owners(digest, |owner| {
            let url = format!(
                "http://{owner}/internal/namespace/{namespace}/blobs/{digest}/metainfo",
                owner = owner,
                namespace = namespace,
                digest = digest.to_hex()
            );
            let http = self.http.clone();
            async move {
                let resp = http.get(url).send().await?;
                map_status(resp.status())?;
                let bytes = resp.bytes().await?;
                MetaInfo::from_bytes(&bytes).map_err(|_| OriginError::Rejected { status: 422 })
            }
        })
        .await
    }

    /// Downloads the full blob body from whichever owner serves it first,
    /// per the same failover/poll rules as [`Self::get_metainfo`].
    pub async fn download_blob(&self, namespace: &str, digest: Digest) -> Result<Vec<u8>, OriginError> {
        self.poll_owners(digest, |owner| {
            let url = format!(
                "http://{owner}/namespace/{namespace}/blobs/{digest}",
                owner = owner,
                namespace = namespace,
                digest = digest.to_hex()
            );
            let http = self.http.clone();
            async move {
                let resp = http.get(url).send().await?;
                map_status(resp.status())?;
                Ok(resp.bytes().await?.to_vec())
            }
        })
        .await
    }

    /// Runs `call` against owners in ring order, honoring the
    /// 202/retry-same-owner vs 5xx/failover vs 4xx/surface disposition and
    /// the overall backoff budget.
    async fn poll_owners<F, Fut, T>(&self, digest: Digest, call: F) -> Result<T, OriginError>
    where
        F: Fn(&str) -> Fut,
        Fut: std::future::Future<Output = Result<T, OriginError>>,
    {
        let owners = self.owners_for(&digest);
        if owners.is_empty() {
            return Err(OriginError::NoOwners);
        }

        let deadline = Instant::now() + self.retry.budget;
        let mut last_err = OriginError::NoOwners;

        for owner in &owners {
            let mut attempt = 0u32;
            loop {
                match call(owner).await {
                    Ok(v) => return Ok(v),
                    Err(err) => {
                        let disposition = RetryPolicy::classify(&err);
                        last_err = err;
                        match disposition {
                            Disposition::Surface => return Err(last_err),
                            Disposition::Failover => break,
                            Disposition::RetrySameOwner => {
                                if Instant::now() >= deadline {
                                    return Err(last_err);
                                }
                                tokio::time::sleep(self.retry.backoff_after(attempt)).await;
                                attempt += 1;
                            }
                        }
                    }
                }
                if Instant::now() >= deadline {
                    return Err(last_err);
                }
            }
        }
        Err(last_err)
    }

    /// Chunked upload: `POST .../uploads` -> `Location`, repeated `PATCH`
    /// with `Content-Range`, then `PUT` to commit. A `409` on commit means
    /// the blob is already present and is treated as success. Retries on
    /// `5xx` seek `reader` back to the start; a seek failure is fatal
    /// (spec.md §4.5).
    pub async fn upload_blob(
        &self,
        namespace: &str,
        digest: Digest,
        total_len: u64,
        mut reader: impl Read + Seek,
    ) -> Result<(), OriginError> {
        let owner = self
            .owners_for(&digest)
            .into_iter()
            .next()
            .ok_or(OriginError::NoOwners)?;

        const MAX_ATTEMPTS: usize = 5;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                reader
                    .seek(SeekFrom::Start(0))
                    .map_err(|_| OriginError::SeekFailed)?;
            }

            let begin_url = format!(
                "http://{owner}/namespace/{namespace}/blobs/{digest}/uploads",
                digest = digest.to_hex()
            );
            let begin = self.http.post(&begin_url).send().await?;
            ensure_success(begin.status())?;
            let uid = begin
                .headers()
                .get("Location")
                .and_then(|v| v.to_str().ok())
                .ok_or(OriginError::Rejected { status: 500 })?
                .to_string();

            let result = self
                .upload_chunks_and_commit(&owner, namespace, digest, &uid, total_len, &mut reader)
                .await;

            match result {
                Ok(()) => return Ok(()),
                Err(err) if RetryPolicy::classify(&err) == Disposition::Failover => {
                    if attempt + 1 == MAX_ATTEMPTS {
                        return Err(err);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(OriginError::BudgetExhausted {
            attempts: MAX_ATTEMPTS,
        })
    }

    async fn upload_chunks_and_commit(
        &self,
        owner: &str,
        namespace: &str,
        digest: Digest,
        uid: &str,
        total_len: u64,
        reader: &mut impl Read,
    ) -> Result<(), OriginError> {
        const CHUNK_SIZE: usize = 4 * 1024 * 1024;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut sent: u64 = 0;

        while sent < total_len {
            let want = CHUNK_SIZE.min((total_len - sent) as usize);
            reader
                .read_exact(&mut buf[..want])
                .map_err(|_| OriginError::Rejected { status: 400 })?;
            let url = format!(
                "http://{owner}/namespace/{namespace}/blobs/{digest}/uploads/{uid}",
                digest = digest.to_hex()
            );
            let range = format!("{}-{}", sent, sent + want as u64 - 1);
            let resp = self
                .http
                .patch(&url)
                .header("Content-Range", range)
                .body(buf[..want].to_vec())
                .send()
                .await?;
            ensure_success(resp.status())?;
            sent += want as u64;
        }

        let commit_url = format!(
            "http://{owner}/namespace/{namespace}/blobs/{digest}/uploads/{uid}",
            digest = digest.to_hex()
        );
        let resp = self.http.put(&commit_url).send().await?;
        if resp.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        ensure_success(resp.status())
    }

    /// Queries every owning origin's `PeerContext` in parallel and returns
    /// the union (spec.md §4.5: "every owning origin is queried...the
    /// union is returned").
    pub async fn peer_contexts(&self, digest: &Digest) -> Vec<PeerContext> {
        let owners = self.owners_for(digest);
        let fetches = owners.into_iter().map(|owner| {
            let http = self.http.clone();
            async move {
                let url = format!("http://{owner}/internal/peercontext");
                http.get(url)
                    .send()
                    .await
                    .ok()?
                    .json::<PeerContext>()
                    .await
                    .ok()
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }
}

/// Status interpretation for upload-protocol calls, where a `202` is an
/// ordinary success (the upload session was created) rather than the
/// "come back later" signal `map_status` gives GET-style reads.
fn ensure_success(status: StatusCode) -> Result<(), OriginError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::CONFLICT => Err(OriginError::AlreadyCommitted),
        s if s.is_server_error() => Err(OriginError::Upstream5xx { status: s.as_u16() }),
        s => Err(OriginError::Rejected { status: s.as_u16() }),
    }
}

fn map_status(status: StatusCode) -> Result<(), OriginError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::ACCEPTED => Err(OriginError::Preparing),
        StatusCode::NOT_FOUND => Err(OriginError::NotFound),
        StatusCode::CONFLICT => Err(OriginError::AlreadyCommitted),
        s if s.is_server_error() => Err(OriginError::Upstream5xx { status: s.as_u16() }),
        s => Err(OriginError::Rejected { status: s.as_u16() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_exceeds_cap() {
        let policy = RetryPolicy::default();
        for attempt in 0..20 {
            let d = policy.backoff_after(attempt);
            assert!(d <= policy.cap + Duration::from_millis((policy.cap.as_millis() as f64 * policy.jitter) as u64));
        }
    }

    #[test]
    fn classifies_dispositions_per_spec() {
        assert_eq!(RetryPolicy::classify(&OriginError::Preparing), Disposition::RetrySameOwner);
        assert_eq!(
            RetryPolicy::classify(&OriginError::Upstream5xx { status: 503 }),
            Disposition::Failover
        );
        assert_eq!(
            RetryPolicy::classify(&OriginError::Rejected { status: 400 }),
            Disposition::Surface
        );
    }

    #[test]
    fn map_status_distinguishes_retryable_from_surfaced() {
        assert!(matches!(map_status(StatusCode::ACCEPTED), Err(OriginError::Preparing)));
        assert!(matches!(
            map_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(OriginError::Upstream5xx { status: 503 })
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST),
            Err(OriginError::Rejected { status: 400 })
        ));
        assert!(map_status(StatusCode::OK).is_ok());
    }
}
