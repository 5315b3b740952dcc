use thiserror::Error;

/// Fatal client errors; everything session-scoped is handled inside the
/// sessions themselves.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("descriptor error: {0}")]
    Metainfo(#[from] crate::metainfo::MetainfoError),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
