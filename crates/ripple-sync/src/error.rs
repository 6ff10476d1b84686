use thiserror::Error;

use ripple_types::events::Table;
use ripple_types::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Snapshot or point read failed.
    #[error("fetch failed: {0}")]
    Fetch(#[source] RemoteError),

    /// Insert, update or delete was rejected.
    #[error("write failed: {0}")]
    Write(#[source] RemoteError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed change notification: {0}")]
    Malformed(String),

    #[error("subscribe failed: {0}")]
    Subscribe(#[source] RemoteError),

    #[error("a live subscription on {0} is still open")]
    AlreadySubscribed(Table),
}

pub type Result<T> = std::result::Result<T, SyncError>;
