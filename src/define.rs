/// A SHA-1 hash digest, 20 bytes long.
///
/// Used for the BitTorrent-compatible wire format: per-piece hashes and the
/// info-hash that identifies a swarm. Distinct from [`crate::digest::Digest`],
/// which identifies blob content and is a SHA-256 hash.
pub type Sha1Hash = [u8; 20];

/// Identifies a swarm. Derived deterministically from the canonical
/// serialization of a [`crate::metainfo::MetaInfo`]'s info dictionary.
pub type InfoHash = Sha1Hash;

/// The peer ID is an arbitrary 20 byte string, generated once at process
/// startup and used to identify this peer to others and to the tracker.
///
/// [`Guidelines for choosing a peer ID`](http://bittorrent.org/beps/bep_0020.html).
pub type PeerId = [u8; 20];

/// The bitfield represents the piece availability of a peer.
///
/// It is a compact bool vector from most significant to least significant
/// bit: the highest bit represents the first piece, the next highest the
/// second piece, and so on.
///
/// A truthy boolean value at a piece's position means that peer has the
/// piece, while a falsy value means that peer doesn't have the piece.
pub type Bitfield = bitvec::prelude::BitVec<u8, bitvec::prelude::Msb0>;

/// The type of a piece's index within a torrent.
///
/// On the wire all integers are sent as 4-byte big endian integers, but in
/// source code we use `usize` to be consistent with other index types.
pub type PieceIndex = usize;

/// The type of a file's index within a torrent's file list.
pub type FileIndex = usize;
