//! Peer wire protocol and per-peer sessions.
//!
//! The wire protocol is a 68-byte handshake followed by length-prefixed
//! frames: a 4-byte big-endian length, then (for non-keepalive frames) a
//! one-byte message id and payload. [`PeerSession`] runs the state machine
//! on top: choke/interest bookkeeping, request pipelining against the
//! scheduler, block delivery into the piece store, and uploads to
//! interested peers.

mod bitfield;
mod error;
mod message;
mod peer_id;
mod session;
mod transport;

pub use bitfield::Bitfield;
pub use error::PeerError;
pub use message::{BlockRequest, Handshake, Message, MessageId, HANDSHAKE_LEN, MAX_BLOCK_LEN};
pub use peer_id::PeerId;
pub use session::{PeerSession, SessionContext};
pub use transport::Transport;

#[cfg(test)]
mod tests;
