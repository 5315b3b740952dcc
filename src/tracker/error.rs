use thiserror::Error;

/// Errors from tracker announces. All are retried with backoff by the
/// announce loop; the download continues against known peers meanwhile.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The announce URL is not http(s).
    #[error("invalid tracker url: {0}")]
    InvalidUrl(String),

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response is not the expected bencoded shape.
    #[error("invalid tracker response: {0}")]
    InvalidResponse(String),

    /// The response is not well-formed bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// The tracker rejected the announce with a `failure reason`.
    #[error("tracker failure: {0}")]
    Failure(String),

    /// The tracker sent a compact peer list, which this client does not
    /// speak.
    #[error("compact peer list not supported")]
    CompactUnsupported,
}
