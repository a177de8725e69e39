//! The peer wire protocol: handshake framing and the post-handshake
//! message codec.

pub mod codec;
pub mod handshake;
pub mod message;

pub use codec::MessageCodec;
pub use handshake::{Handshake, HandshakeCodec, PROTOCOL_STRING};
pub use message::{Message, MessageId};
