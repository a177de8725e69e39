use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::Bitfield;

use super::message::{Message, MessageId};

/// Length-prefixed framing for [`Message`]: a 4-byte big-endian length
/// (covering the message id byte plus payload) followed by the payload
/// itself. Grounded on the handshake codec's peek-before-advance approach
/// to partial reads, generalized to the variable-length message body.
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: Message, buf: &mut BytesMut) -> io::Result<()> {
        match msg {
            Message::Bitfield(bitfield) => {
                let payload_len = 1 + bitfield.as_raw_slice().len();
                buf.put_u32(payload_len as u32);
                buf.put_u8(MessageId::Bitfield as u8);
                buf.extend_from_slice(bitfield.as_raw_slice());
            }
            Message::Have { piece_index } => {
                buf.put_u32(1 + 4);
                buf.put_u8(MessageId::Have as u8);
                buf.put_u32(piece_index as u32);
            }
            Message::Request { piece_index } => {
                buf.put_u32(1 + 4);
                buf.put_u8(MessageId::Request as u8);
                buf.put_u32(piece_index as u32);
            }
            Message::Piece { piece_index, data } => {
                buf.put_u32((1 + 4 + data.len()) as u32);
                buf.put_u8(MessageId::Piece as u8);
                buf.put_u32(piece_index as u32);
                buf.extend_from_slice(&data);
            }
            Message::Cancel { piece_index } => {
                buf.put_u32(1 + 4);
                buf.put_u8(MessageId::Cancel as u8);
                buf.put_u32(piece_index as u32);
            }
        }
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Message>> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&buf[0..4]);
        let payload_len = u32::from_be_bytes(len_bytes) as usize;

        if buf.len() < 4 + payload_len {
            buf.reserve(4 + payload_len - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let mut payload = buf.split_to(payload_len);

        if payload.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "empty message payload",
            ));
        }

        let id = payload.get_u8();
        let id = MessageId::try_from(id)
            .map_err(|b| io::Error::new(io::ErrorKind::InvalidData, format!("unknown message id {b}")))?;

        let msg = match id {
            MessageId::Bitfield => Message::Bitfield(Bitfield::from_vec(payload.to_vec())),
            MessageId::Have => {
                let piece_index = payload.get_u32() as usize;
                Message::Have { piece_index }
            }
            MessageId::Request => {
                let piece_index = payload.get_u32() as usize;
                Message::Request { piece_index }
            }
            MessageId::Piece => {
                let piece_index = payload.get_u32() as usize;
                Message::Piece {
                    piece_index,
                    data: payload.freeze(),
                }
            }
            MessageId::Cancel => {
                let piece_index = payload.get_u32() as usize;
                Message::Cancel { piece_index }
            }
        };

        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let mut buf = BytesMut::new();
        MessageCodec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = MessageCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn have_roundtrips() {
        roundtrip(Message::Have { piece_index: 42 });
    }

    #[test]
    fn request_roundtrips() {
        roundtrip(Message::Request { piece_index: 7 });
    }

    #[test]
    fn cancel_roundtrips() {
        roundtrip(Message::Cancel { piece_index: 7 });
    }

    #[test]
    fn bitfield_roundtrips() {
        let bitfield = Bitfield::from_vec(vec![0b1010_0000, 0b0000_0001]);
        roundtrip(Message::Bitfield(bitfield));
    }

    #[test]
    fn piece_roundtrips() {
        roundtrip(Message::Piece {
            piece_index: 3,
            data: Bytes::from_static(b"hello piece"),
        });
    }

    #[test]
    fn partial_frame_returns_none_until_complete() {
        let mut buf = BytesMut::new();
        MessageCodec
            .encode(
                Message::Piece {
                    piece_index: 1,
                    data: Bytes::from_static(b"0123456789"),
                },
                &mut buf,
            )
            .unwrap();

        let mut partial = buf[0..buf.len() - 1].into();
        assert_eq!(MessageCodec.decode(&mut partial).unwrap(), None);
        assert!(MessageCodec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn unknown_message_id_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(1);
        buf.put_u8(0xFF);
        assert!(MessageCodec.decode(&mut buf).is_err());
    }
}
