/// Per-block state within a non-verified piece. Every block is in exactly
/// one of these at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    Missing,
    InFlight,
    Received,
}

/// Block ledger and staging buffer for one piece being downloaded.
///
/// Blocks are fixed-size slots of `block_size` bytes, the last one
/// possibly short; callers address a block by its slot index after
/// validating the exact (offset, length) pair against the layout.
#[derive(Debug)]
pub(crate) struct PieceProgress {
    piece_length: u32,
    block_size: u32,
    states: Vec<BlockState>,
    buffer: Vec<u8>,
    received: usize,
    /// Set while the assembled buffer is being hashed outside the lock;
    /// freezes reservations and deliveries for the piece.
    pub(crate) verifying: bool,
}

impl PieceProgress {
    pub(crate) fn new(piece_length: u32, block_size: u32) -> Self {
        let blocks = piece_length.div_ceil(block_size) as usize;
        Self {
            piece_length,
            block_size,
            states: vec![BlockState::Missing; blocks],
            buffer: vec![0u8; piece_length as usize],
            received: 0,
            verifying: false,
        }
    }

    fn block_length(&self, index: usize) -> u32 {
        let offset = index as u32 * self.block_size;
        self.block_size.min(self.piece_length - offset)
    }

    pub(crate) fn state(&self, index: usize) -> BlockState {
        self.states[index]
    }

    pub(crate) fn set_state(&mut self, index: usize, state: BlockState) {
        self.states[index] = state;
    }

    /// Reserves the lowest-offset missing block, if any.
    pub(crate) fn reserve_next(&mut self) -> Option<(u32, u32)> {
        let index = self
            .states
            .iter()
            .position(|&s| s == BlockState::Missing)?;
        self.states[index] = BlockState::InFlight;
        Some((index as u32 * self.block_size, self.block_length(index)))
    }

    /// Copies a received block into the staging buffer and marks it.
    pub(crate) fn accept(&mut self, index: usize, offset: u32, data: &[u8]) {
        let start = offset as usize;
        self.buffer[start..start + data.len()].copy_from_slice(data);
        if self.states[index] != BlockState::Received {
            self.received += 1;
        }
        self.states[index] = BlockState::Received;
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.received == self.states.len()
    }

    /// Whether any block has left the missing state.
    pub(crate) fn is_touched(&self) -> bool {
        self.states.iter().any(|&s| s != BlockState::Missing)
    }

    /// Takes the assembled piece bytes for hashing; the ledger keeps its
    /// received marks so duplicate deliveries stay no-ops while verifying.
    pub(crate) fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Clears everything back to missing after a digest mismatch.
    pub(crate) fn reset(&mut self) {
        self.states.fill(BlockState::Missing);
        self.buffer = vec![0u8; self.piece_length as usize];
        self.received = 0;
        self.verifying = false;
    }
}
