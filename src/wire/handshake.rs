use std::io::{self, Cursor};

use bytes::{Buf, BufMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{InfoHash, PeerId};

pub const PROTOCOL_STRING: &str = "blobmesh protocol";

/// The message sent at the beginning of a peer session by both sides of the
/// connection, identifying the swarm and the sender.
///
/// ```text
/// <prot len><prot><reserved><info hash><peer id>
/// | 1 byte |  19  |    8    |    20    |   20   |
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Handshake {
    pub prot: [u8; 18],
    /// Reserved for future extension bits, currently always zero.
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        let mut prot = [0; 18];
        prot.copy_from_slice(PROTOCOL_STRING.as_bytes());
        Handshake {
            prot,
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }
}

pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = io::Error;

    fn encode(&mut self, handshake: Handshake, buf: &mut bytes::BytesMut) -> io::Result<()> {
        let Handshake {
            prot,
            reserved,
            info_hash,
            peer_id,
        } = handshake;

        buf.put_u8(prot.len() as u8);
        buf.extend_from_slice(&prot);
        buf.extend_from_slice(&reserved);
        buf.extend_from_slice(&info_hash);
        buf.extend_from_slice(&peer_id);
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut bytes::BytesMut) -> io::Result<Option<Handshake>> {
        if buf.is_empty() {
            return Ok(None);
        }

        let mut tmp_buf = Cursor::new(&buf);
        let prot_len = tmp_buf.get_u8() as usize;
        if prot_len != PROTOCOL_STRING.as_bytes().len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "handshake protocol string mismatch",
            ));
        }

        let payload_len = 1 + prot_len + 8 + 20 + 20;
        if buf.remaining() < payload_len {
            return Ok(None);
        }
        buf.advance(1);

        let mut prot = [0; 18];
        buf.copy_to_slice(&mut prot);
        let mut reserved = [0; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Some(Handshake {
            prot,
            reserved,
            info_hash,
            peer_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let handshake = Handshake::new([7; 20], [9; 20]);
        let mut buf = bytes::BytesMut::new();
        HandshakeCodec.encode(handshake, &mut buf).unwrap();

        let mut partial = buf[0..10].into();
        assert_eq!(HandshakeCodec.decode(&mut partial).unwrap(), None);

        let decoded = HandshakeCodec.decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(handshake));
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut buf = bytes::BytesMut::new();
        buf.put_u8(5);
        buf.extend_from_slice(b"whoop");
        buf.extend_from_slice(&[0; 8 + 20 + 20]);
        assert!(HandshakeCodec.decode(&mut buf).is_err());
    }
}
