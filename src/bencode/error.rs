use thiserror::Error;

/// Errors produced by the bencode decoder.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// Input ended before a complete value was parsed.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Malformed integer: empty, leading zeros, `-0`, or non-decimal.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Byte-string length prefix is not a decimal number.
    #[error("invalid string length")]
    InvalidStringLength,

    /// A dictionary key that is not a byte string.
    #[error("dictionary key is not a byte string")]
    NonStringKey,

    /// A byte that cannot start a value.
    #[error("unexpected character: {0:?}")]
    UnexpectedChar(char),

    /// Data remaining after the top-level value.
    #[error("trailing data after value")]
    TrailingData,

    /// Recursion limit exceeded.
    #[error("nesting too deep")]
    NestingTooDeep,
}
