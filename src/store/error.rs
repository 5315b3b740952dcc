use thiserror::Error;

/// Errors from the piece store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Disk I/O failure; fatal to the download.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A block reference outside the piece, or with a length that does not
    /// match the block layout. State is never mutated on this error.
    #[error("invalid block: piece {piece} offset {offset} length {length}")]
    InvalidBlock { piece: u32, offset: u32, length: u32 },

    /// A read of a piece that is not verified.
    #[error("piece {0} not available")]
    NotAvailable(u32),
}
