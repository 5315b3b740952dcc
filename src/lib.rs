//! shoal - a simplified BitTorrent-style file distribution engine
//!
//! A fixed-content file is partitioned into fixed-size pieces whose SHA-1
//! digests are published in a torrent descriptor; a central tracker
//! aggregates swarm membership, and peers exchange pieces directly over a
//! length-prefixed framed message protocol with pipelined block requests.
//!
//! # Modules
//!
//! - [`bencode`] - Bencode encoding/decoding for descriptors and tracker payloads
//! - [`metainfo`] - Torrent descriptor parsing and info-hash computation
//! - [`store`] - On-disk piece storage, verification, and block assembly
//! - [`peer`] - Peer wire protocol and per-peer session state machine
//! - [`tracker`] - HTTP tracker announce client
//! - [`client`] - Orchestrator: announce loop, listener, dialer, scheduler

pub mod bencode;
pub mod client;
pub mod metainfo;
pub mod peer;
pub mod store;
pub mod tracker;

pub use bencode::{decode, encode, BencodeError, Value};
pub use client::{Client, Config, Scheduler};
pub use metainfo::{InfoHash, Metainfo, MetainfoError};
pub use peer::{Bitfield, BlockRequest, Handshake, Message, PeerError, PeerId, PeerSession};
pub use store::{Delivery, PieceStore, StoreError};
pub use tracker::{AnnounceResponse, PeerEntry, TrackerClient, TrackerError, TrackerEvent};
