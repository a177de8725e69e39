//! Peer-set rendezvous for swarms (spec.md §4.4): a process-local,
//! in-memory announce service plus the client agents and origins use to
//! talk to it.
//!
//! Reshaped from the teacher's BitTorrent tracker client (bencode over an
//! HTTP GET query string, talking to a tracker this crate doesn't own) into
//! a JSON-over-HTTP-POST protocol with both sides implemented here: this
//! system runs its own tracker rather than relying on a third-party one.

pub mod client;
pub mod peer_context;
pub mod server;
pub mod wire;

pub use client::{Client, ClientConf};
pub use peer_context::PeerContext;
pub use server::{ServerConf, Tracker};
pub use wire::{AnnounceRequest, AnnounceResponse, PeerAddr};
