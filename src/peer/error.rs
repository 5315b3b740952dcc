use thiserror::Error;

/// Errors that close a peer session.
///
/// All of these are session-scoped: the session releases its reservations
/// and deregisters, and the orchestrator may redial after a backoff.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Network I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake with a bad protocol tag or mismatched info-hash.
    #[error("bad handshake")]
    BadHandshake,

    /// The remote is ourselves or a peer we are already connected to.
    #[error("duplicate peer")]
    Duplicate,

    /// A frame that cannot be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A message id outside the protocol.
    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    /// A well-formed message violating protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The remote closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nothing received within the liveness window.
    #[error("timeout")]
    Timeout,

    /// The global shutdown signal fired; a clean close.
    #[error("shutdown")]
    Shutdown,
}
