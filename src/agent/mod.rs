//! The agent: a node that leeches blobs into its local cache on behalf of
//! callers and seeds pieces back out to the swarm while doing so.

pub mod server;
pub mod tags;

pub use server::{router, AgentState};
pub use tags::TagStore;
