use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use sha1::{Digest, Sha1};
use tokio::sync::broadcast;

use super::error::StoreError;
use super::file::PieceFile;
use super::progress::{BlockState, PieceProgress};
use crate::metainfo::Metainfo;
use crate::peer::{Bitfield, BlockRequest};

const VERIFY_BATCH: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of delivering a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The piece still has missing blocks (also returned for late
    /// duplicates, which mutate nothing).
    AcceptedPartial,
    /// The last block arrived and the digest matched; the bit is set and
    /// subscribers were notified.
    AcceptedVerified,
    /// The last block arrived and the digest mismatched; all block state
    /// for the piece was cleared and it is missing again.
    AcceptedRejected,
}

/// Thread-safe owner of the on-disk file, the bitfield, and all per-piece
/// block state.
///
/// Locking shape: a `RwLock` around the bitfield and a `Mutex` around the
/// active-piece map, neither ever held across an await point; the file
/// handle has its own async mutex.
pub struct PieceStore {
    metainfo: Arc<Metainfo>,
    file: PieceFile,
    block_size: u32,
    bitfield: RwLock<Bitfield>,
    active: Mutex<HashMap<u32, PieceProgress>>,
    events: broadcast::Sender<u32>,
    verified_bytes: AtomicU64,
}

impl PieceStore {
    /// Opens the target file under `directory`, pre-sizes it, and runs
    /// startup verification if the file already existed.
    pub async fn open(
        metainfo: Arc<Metainfo>,
        directory: &Path,
        block_size: u32,
    ) -> Result<Self, StoreError> {
        let path = directory.join(&metainfo.name);
        let (file, existed) = PieceFile::open(&path, metainfo.total_length).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let store = Self {
            bitfield: RwLock::new(Bitfield::new(metainfo.piece_count())),
            metainfo,
            file,
            block_size,
            active: Mutex::new(HashMap::new()),
            events,
            verified_bytes: AtomicU64::new(0),
        };

        if existed {
            store.verify_existing().await?;
        }
        Ok(store)
    }

    /// Hashes every piece on disk against the published digests and sets
    /// the matching bits. Reads are serialized by the file handle; the
    /// hashing overlaps across a batch.
    async fn verify_existing(&self) -> Result<(), StoreError> {
        let piece_count = self.metainfo.piece_count();
        let mut verified = 0usize;

        for batch_start in (0..piece_count).step_by(VERIFY_BATCH) {
            let batch_end = (batch_start + VERIFY_BATCH).min(piece_count);
            let checks = (batch_start..batch_end).map(|i| self.matches_digest(i as u32));

            for (i, result) in (batch_start..batch_end).zip(join_all(checks).await) {
                if result? {
                    let piece = i as u32;
                    self.bitfield.write().set(piece);
                    self.verified_bytes
                        .fetch_add(self.metainfo.piece_length_of(piece), Ordering::Relaxed);
                    verified += 1;
                }
            }
        }

        tracing::info!(
            verified,
            total = piece_count,
            "startup verification complete"
        );
        Ok(())
    }

    /// Reads piece `piece` from disk and compares its digest.
    async fn matches_digest(&self, piece: u32) -> Result<bool, StoreError> {
        let expected = match self.metainfo.piece_hash(piece) {
            Some(hash) => *hash,
            None => return Ok(false),
        };
        let length = self.metainfo.piece_length_of(piece) as usize;
        let data = self.file.read_at(self.metainfo.piece_offset(piece), length).await?;
        hash_matches(data, expected).await
    }

    /// Snapshot read of one bit.
    pub fn have(&self, piece: u32) -> bool {
        self.bitfield.read().has(piece)
    }

    /// Atomic copy of the full bitfield.
    pub fn bitfield_snapshot(&self) -> Bitfield {
        self.bitfield.read().clone()
    }

    /// Indices of pieces not yet verified.
    pub fn missing_pieces(&self) -> Vec<u32> {
        let bitfield = self.bitfield.read();
        (0..self.metainfo.piece_count() as u32)
            .filter(|&i| !bitfield.has(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.bitfield.read().is_complete()
    }

    pub fn verified_count(&self) -> usize {
        self.bitfield.read().count()
    }

    pub fn piece_count(&self) -> usize {
        self.metainfo.piece_count()
    }

    /// Bytes of verified pieces, the tracker's `downloaded` figure.
    pub fn bytes_verified(&self) -> u64 {
        self.verified_bytes.load(Ordering::Relaxed)
    }

    /// Bytes still needed, the tracker's `left` figure.
    pub fn bytes_left(&self) -> u64 {
        self.metainfo.total_length - self.bytes_verified()
    }

    /// Subscribes to verified-piece events.
    pub fn subscribe(&self) -> broadcast::Receiver<u32> {
        self.events.subscribe()
    }

    /// Pieces with some block already in flight or received; the scheduler
    /// prefers finishing these over starting fresh pieces.
    pub fn partial_pieces(&self) -> Vec<u32> {
        let active = self.active.lock();
        let mut pieces: Vec<u32> = active
            .iter()
            .filter(|(_, p)| p.is_touched() && !p.verifying)
            .map(|(&i, _)| i)
            .collect();
        pieces.sort_unstable();
        pieces
    }

    /// Attempts to mark the exact block as in flight. False if the piece
    /// is verified or being verified, the range does not name a block, or
    /// the block is not missing.
    pub fn reserve_block(&self, piece: u32, offset: u32, length: u32) -> bool {
        if self.have(piece) {
            return false;
        }
        let Some(index) = self.block_slot(piece, offset, length) else {
            return false;
        };
        let mut active = self.active.lock();
        let progress = active
            .entry(piece)
            .or_insert_with(|| self.fresh_progress(piece));
        if progress.verifying || progress.state(index) != BlockState::Missing {
            return false;
        }
        progress.set_state(index, BlockState::InFlight);
        true
    }

    /// Reserves the lowest-offset missing block of `piece`, if any.
    pub fn reserve_next_block(&self, piece: u32) -> Option<BlockRequest> {
        if self.have(piece) || self.metainfo.piece_hash(piece).is_none() {
            return None;
        }
        let mut active = self.active.lock();
        let progress = active
            .entry(piece)
            .or_insert_with(|| self.fresh_progress(piece));
        if progress.verifying {
            return None;
        }
        let (offset, length) = progress.reserve_next()?;
        Some(BlockRequest::new(piece, offset, length))
    }

    /// Returns a reserved block to missing so another session can request
    /// it. A no-op unless the exact range is currently in flight.
    pub fn release_block(&self, piece: u32, offset: u32, length: u32) {
        let Some(index) = self.block_slot(piece, offset, length) else {
            return;
        };
        let mut active = self.active.lock();
        let mut drop_entry = false;
        if let Some(progress) = active.get_mut(&piece) {
            if !progress.verifying && progress.state(index) == BlockState::InFlight {
                progress.set_state(index, BlockState::Missing);
                drop_entry = !progress.is_touched();
            }
        }
        if drop_entry {
            active.remove(&piece);
        }
    }

    /// Writes a received block into the piece's staging buffer. When the
    /// last block lands the piece is hashed; a match writes the piece to
    /// disk, sets the bit, and notifies subscribers, while a mismatch
    /// clears the piece back to missing.
    pub async fn deliver_block(
        &self,
        piece: u32,
        offset: u32,
        data: &[u8],
    ) -> Result<Delivery, StoreError> {
        let invalid = || StoreError::InvalidBlock {
            piece,
            offset,
            length: data.len() as u32,
        };
        if self.metainfo.piece_hash(piece).is_none() {
            return Err(invalid());
        }
        // Late duplicate for an already-verified piece.
        if self.have(piece) {
            return Ok(Delivery::AcceptedPartial);
        }
        let index = self
            .block_slot(piece, offset, data.len() as u32)
            .ok_or_else(|| invalid())?;

        let assembled = {
            let mut active = self.active.lock();
            let progress = active
                .entry(piece)
                .or_insert_with(|| self.fresh_progress(piece));
            if progress.verifying || progress.state(index) == BlockState::Received {
                return Ok(Delivery::AcceptedPartial);
            }
            progress.accept(index, offset, data);
            if !progress.is_complete() {
                return Ok(Delivery::AcceptedPartial);
            }
            progress.verifying = true;
            progress.take_buffer()
        };

        let expected = match self.metainfo.piece_hash(piece) {
            Some(hash) => *hash,
            None => return Err(invalid()),
        };
        let (matched, assembled) = hash_piece(assembled, expected).await?;
        if matched {
            self.file
                .write_at(self.metainfo.piece_offset(piece), &assembled)
                .await?;
            self.bitfield.write().set(piece);
            self.verified_bytes
                .fetch_add(self.metainfo.piece_length_of(piece), Ordering::Relaxed);
            self.active.lock().remove(&piece);
            let _ = self.events.send(piece);
            tracing::debug!(
                piece,
                have = self.verified_count(),
                total = self.piece_count(),
                "piece verified"
            );
            Ok(Delivery::AcceptedVerified)
        } else {
            if let Some(progress) = self.active.lock().get_mut(&piece) {
                progress.reset();
            }
            tracing::warn!(piece, "piece digest mismatch, discarding");
            Ok(Delivery::AcceptedRejected)
        }
    }

    /// Serves a block of a verified piece for upload.
    pub async fn read_block(
        &self,
        piece: u32,
        offset: u32,
        length: u32,
    ) -> Result<Bytes, StoreError> {
        if !self.have(piece) {
            return Err(StoreError::NotAvailable(piece));
        }
        let piece_length = self.metainfo.piece_length_of(piece);
        if length == 0 || offset as u64 + length as u64 > piece_length {
            return Err(StoreError::InvalidBlock {
                piece,
                offset,
                length,
            });
        }
        let data = self
            .file
            .read_at(self.metainfo.piece_offset(piece) + offset as u64, length as usize)
            .await?;
        Ok(Bytes::from(data))
    }

    /// Flushes file contents to disk; called once at shutdown.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.file.flush().await?;
        Ok(())
    }

    fn fresh_progress(&self, piece: u32) -> PieceProgress {
        PieceProgress::new(self.metainfo.piece_length_of(piece) as u32, self.block_size)
    }

    /// Maps an exact (offset, length) pair onto the piece's block layout.
    fn block_slot(&self, piece: u32, offset: u32, length: u32) -> Option<usize> {
        let piece_length = self.metainfo.piece_length_of(piece) as u32;
        if piece_length == 0 || offset % self.block_size != 0 || offset >= piece_length {
            return None;
        }
        let expected = self.block_size.min(piece_length - offset);
        (length == expected).then_some((offset / self.block_size) as usize)
    }
}

/// SHA-1 comparison on the blocking pool; piece buffers are large enough
/// to matter on the async threads.
async fn hash_matches(data: Vec<u8>, expected: [u8; 20]) -> Result<bool, StoreError> {
    Ok(hash_piece(data, expected).await?.0)
}

/// Like [`hash_matches`] but hands the buffer back for the disk write.
async fn hash_piece(data: Vec<u8>, expected: [u8; 20]) -> Result<(bool, Vec<u8>), StoreError> {
    tokio::task::spawn_blocking(move || {
        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest: [u8; 20] = hasher.finalize().into();
        (digest == expected, data)
    })
    .await
    .map_err(|e| StoreError::Io(std::io::Error::other(e)))
}
