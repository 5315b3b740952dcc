use thiserror::Error;

/// Errors from descriptor parsing.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The descriptor is not well-formed bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// A required key is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A key is present but has the wrong type or an invalid value.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The `pieces` blob length is not piece-count * 20.
    #[error("piece hash blob length {got} does not match {expected} pieces")]
    PieceHashMismatch { expected: usize, got: usize },

    /// Multi-file descriptors are not supported.
    #[error("multi-file torrents are not supported")]
    MultiFile,
}
