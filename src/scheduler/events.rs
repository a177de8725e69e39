//! Re-exports the observability event vocabulary the scheduler emits.
//! Kept as its own module, matching the engine's original split between
//! the command surface (`mod.rs`) and the alerting surface, now folded
//! into the crate-wide [`crate::observability`] handle.

pub use crate::observability::{Event, Observability};
