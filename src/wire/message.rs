use bytes::Bytes;

use crate::{Bitfield, PieceIndex};

/// The wire message types a connection exchanges after a successful
/// handshake. There is no `Choke`/`Unchoke`/`Interested` exchange and no
/// sub-piece block addressing: every piece is requested and sent whole.
#[derive(Debug, PartialEq)]
#[cfg_attr(test, derive(Clone))]
pub enum Message {
    /// Sent once, right after the handshake: which pieces this peer holds.
    Bitfield(Bitfield),
    /// Announces that a new piece has become available.
    Have { piece_index: PieceIndex },
    /// Requests the whole of `piece_index`.
    Request { piece_index: PieceIndex },
    /// The full contents of a previously requested piece.
    Piece {
        piece_index: PieceIndex,
        data: Bytes,
    },
    /// Withdraws a previously sent `Request`.
    Cancel { piece_index: PieceIndex },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Bitfield = 0,
    Have = 1,
    Request = 2,
    Piece = 3,
    Cancel = 4,
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0 => Ok(MessageId::Bitfield),
            1 => Ok(MessageId::Have),
            2 => Ok(MessageId::Request),
            3 => Ok(MessageId::Piece),
            4 => Ok(MessageId::Cancel),
            other => Err(other),
        }
    }
}
