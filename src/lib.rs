pub mod agent;
pub mod conf;
pub mod digest;
pub mod error;
pub mod metainfo;
pub mod origin;
pub mod store;
pub mod tracker;
pub mod wire;

pub mod avg;
pub mod counter;
pub mod observability;
pub mod scheduler;

mod define;
pub use define::*;
