//! On-disk piece storage, verification, and block assembly.
//!
//! The store owns the target file, pre-sized to the torrent's total
//! length, and the authoritative bitfield. At startup every piece on disk
//! is hashed against the published digests, which bootstraps a seeder from
//! a finished file and a resumed download from a partial one.
//!
//! Incoming blocks assemble in a per-piece staging buffer; a completed
//! piece is hashed, and only after the verified bytes are written to disk
//! does its bit get set and a verification event go out on the broadcast
//! channel. A hash mismatch clears all block state for the piece, so it
//! returns to missing without ever touching the file.

mod error;
mod file;
mod manager;
mod progress;

pub use error::StoreError;
pub use manager::{Delivery, PieceStore};
