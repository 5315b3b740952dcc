//! Torrent descriptor parsing.
//!
//! A descriptor is a bencoded dictionary with an `announce` URL and an
//! `info` dictionary (`name`, `piece length`, `pieces`, `length`). The
//! info-hash identifying the swarm is the SHA-1 digest of the canonical
//! re-encoding of the `info` value. Single-file torrents only.

mod error;
mod info_hash;
mod torrent;

pub use error::MetainfoError;
pub use info_hash::InfoHash;
pub use torrent::Metainfo;

#[cfg(test)]
mod tests;
