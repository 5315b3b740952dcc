use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::PeerError;
use super::peer_id::PeerId;
use crate::metainfo::InfoHash;

/// The protocol tag carried in every handshake.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
/// Handshake length: 1 + 19 + 8 + 20 + 20.
pub const HANDSHAKE_LEN: usize = 68;
/// Upper bound on a requested block length (2^17).
pub const MAX_BLOCK_LEN: u32 = 131072;

/// A request for one block: piece index, byte offset within the piece,
/// and length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRequest {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockRequest {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }
}

/// The fixed 68-byte frame exchanged immediately after connecting.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&[0u8; 8]);
        buf.put_slice(self.info_hash.as_bytes());
        buf.put_slice(self.peer_id.as_bytes());
        buf.freeze()
    }

    /// Decodes a handshake, rejecting a wrong length byte or protocol tag.
    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() != HANDSHAKE_LEN || data[0] as usize != PROTOCOL.len() {
            return Err(PeerError::BadHandshake);
        }
        if &data[1..20] != PROTOCOL {
            return Err(PeerError::BadHandshake);
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);
        Ok(Self {
            info_hash: InfoHash(info_hash),
            peer_id: PeerId::from_bytes(peer_id),
        })
    }
}

/// Message ids of the wire protocol. Anything else is a protocol
/// violation and closes the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = PeerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            other => Err(PeerError::UnknownMessageId(other)),
        }
    }
}

/// A post-handshake frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Zero-length frame; resets the liveness clock and nothing else.
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// The sender verified the given piece.
    Have(u32),
    /// Snapshot of the sender's verified pieces; only valid as the first
    /// post-handshake message.
    Bitfield(Bytes),
    /// Ask for a block.
    Request(BlockRequest),
    /// A block of piece data.
    Piece {
        piece: u32,
        offset: u32,
        data: Bytes,
    },
    /// Withdraw a previous request, best-effort.
    Cancel(BlockRequest),
}

impl Message {
    /// Encodes the frame including its 4-byte length prefix.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke => put_header(&mut buf, MessageId::Choke, 0),
            Message::Unchoke => put_header(&mut buf, MessageId::Unchoke, 0),
            Message::Interested => put_header(&mut buf, MessageId::Interested, 0),
            Message::NotInterested => put_header(&mut buf, MessageId::NotInterested, 0),
            Message::Have(piece) => {
                put_header(&mut buf, MessageId::Have, 4);
                buf.put_u32(*piece);
            }
            Message::Bitfield(bits) => {
                put_header(&mut buf, MessageId::Bitfield, bits.len());
                buf.put_slice(bits);
            }
            Message::Request(req) => {
                put_header(&mut buf, MessageId::Request, 12);
                buf.put_u32(req.piece);
                buf.put_u32(req.offset);
                buf.put_u32(req.length);
            }
            Message::Piece {
                piece,
                offset,
                data,
            } => {
                put_header(&mut buf, MessageId::Piece, 8 + data.len());
                buf.put_u32(*piece);
                buf.put_u32(*offset);
                buf.put_slice(data);
            }
            Message::Cancel(req) => {
                put_header(&mut buf, MessageId::Cancel, 12);
                buf.put_u32(req.piece);
                buf.put_u32(req.offset);
                buf.put_u32(req.length);
            }
        }
        buf.freeze()
    }

    /// Decodes one frame body (everything after the length prefix).
    /// An empty body is a keepalive.
    pub fn decode(mut body: Bytes) -> Result<Self, PeerError> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }
        let id = MessageId::try_from(body.get_u8())?;
        let payload_len = body.remaining();

        let expect = |want: usize| {
            if payload_len == want {
                Ok(())
            } else {
                Err(PeerError::InvalidMessage(format!(
                    "{:?} payload length {}, want {}",
                    id, payload_len, want
                )))
            }
        };

        match id {
            MessageId::Choke => expect(0).map(|_| Message::Choke),
            MessageId::Unchoke => expect(0).map(|_| Message::Unchoke),
            MessageId::Interested => expect(0).map(|_| Message::Interested),
            MessageId::NotInterested => expect(0).map(|_| Message::NotInterested),
            MessageId::Have => {
                expect(4)?;
                Ok(Message::Have(body.get_u32()))
            }
            MessageId::Bitfield => Ok(Message::Bitfield(body.copy_to_bytes(payload_len))),
            MessageId::Request => {
                expect(12)?;
                Ok(Message::Request(BlockRequest::new(
                    body.get_u32(),
                    body.get_u32(),
                    body.get_u32(),
                )))
            }
            MessageId::Piece => {
                if payload_len < 8 {
                    return Err(PeerError::InvalidMessage("piece too short".into()));
                }
                let piece = body.get_u32();
                let offset = body.get_u32();
                Ok(Message::Piece {
                    piece,
                    offset,
                    data: body.copy_to_bytes(payload_len - 8),
                })
            }
            MessageId::Cancel => {
                expect(12)?;
                Ok(Message::Cancel(BlockRequest::new(
                    body.get_u32(),
                    body.get_u32(),
                    body.get_u32(),
                )))
            }
        }
    }
}

fn put_header(buf: &mut BytesMut, id: MessageId, payload_len: usize) {
    buf.put_u32(1 + payload_len as u32);
    buf.put_u8(id as u8);
}
