//! The origin cluster: content-addressed blob storage fronted by an HTTP
//! API, consistent-hashed across a fixed set of hosts so every namespace's
//! blobs have a small, deterministic set of owning origins.

pub mod client;
pub mod remote_backend;
pub mod ring;
pub mod server;
pub mod verify;

pub use client::{ClusterClient, Disposition, RetryPolicy};
pub use remote_backend::{fetch_and_promote, RemoteBackend, Refresher};
pub use ring::Ring;
pub use server::{router, OriginState};
pub use verify::{NoopVerificationHook, VerificationDecision, VerificationHook};
