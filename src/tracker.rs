//! HTTP tracker announce client.
//!
//! Announces are GET requests carrying the info-hash, peer-ID, listen
//! port, transfer counters, and an optional lifecycle event. The response
//! is a bencoded dictionary with the re-announce `interval` and a `peers`
//! list.
//!
//! Peer lists are the dictionary form only: a list of dictionaries with
//! `ip`, `port`, and `peer id` keys. The compact 6-byte-per-peer encoding
//! is rejected as [`TrackerError::CompactUnsupported`].

mod client;
mod error;
mod response;

pub use client::{Announce, TrackerClient};
pub use error::TrackerError;
pub use response::{AnnounceResponse, PeerEntry, TrackerEvent};
