use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::peer::{Bitfield, BlockRequest};
use crate::store::PieceStore;

/// Decides what each session should request next.
///
/// Holder counts per piece are maintained from session bitfield, `have`,
/// and disconnect deltas. Selection prefers finishing pieces that already
/// have blocks in flight, then falls back to rarest-first over fresh
/// pieces, breaking availability ties uniformly at random.
pub struct Scheduler {
    store: Arc<PieceStore>,
    availability: Mutex<Vec<u32>>,
}

impl Scheduler {
    pub fn new(store: Arc<PieceStore>) -> Self {
        let pieces = store.piece_count();
        Self {
            store,
            availability: Mutex::new(vec![0; pieces]),
        }
    }

    /// Counts a freshly received remote bitfield.
    pub fn peer_joined(&self, bitfield: &Bitfield) {
        let mut counts = self.availability.lock();
        for i in 0..counts.len() {
            if bitfield.has(i as u32) {
                counts[i] += 1;
            }
        }
    }

    /// Counts a `have` announcement.
    pub fn peer_has(&self, piece: u32) {
        let mut counts = self.availability.lock();
        if let Some(count) = counts.get_mut(piece as usize) {
            *count += 1;
        }
    }

    /// Uncounts everything a departing session's bitfield contributed.
    pub fn peer_left(&self, bitfield: &Bitfield) {
        let mut counts = self.availability.lock();
        for i in 0..counts.len() {
            if bitfield.has(i as u32) {
                counts[i] = counts[i].saturating_sub(1);
            }
        }
    }

    /// Current holder count for a piece.
    pub fn availability(&self, piece: u32) -> u32 {
        self.availability
            .lock()
            .get(piece as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Picks and reserves the next block for a session whose remote holds
    /// `remote`. None leaves the pipeline slot empty until a verification
    /// or unchoke event re-consults.
    pub fn next_request(&self, remote: &Bitfield) -> Option<BlockRequest> {
        // Finish partially downloaded pieces before opening new ones.
        for piece in self.store.partial_pieces() {
            if remote.has(piece) && !self.store.have(piece) {
                if let Some(request) = self.store.reserve_next_block(piece) {
                    return Some(request);
                }
            }
        }

        // Fresh pieces, rarest first; shuffling before the stable sort
        // makes the tie-break uniform.
        let mut candidates: Vec<u32> = self
            .store
            .missing_pieces()
            .into_iter()
            .filter(|&piece| remote.has(piece))
            .collect();
        candidates.shuffle(&mut rand::rng());
        {
            let counts = self.availability.lock();
            candidates.sort_by_key(|&piece| counts[piece as usize]);
        }

        candidates
            .into_iter()
            .find_map(|piece| self.store.reserve_next_block(piece))
    }
}
