use thiserror::Error;

/// Errors surfaced by the Store Client.
///
/// `Transient` errors are the ones the watch/reconnect machinery retries internally and
/// never surfaces to VMs/networks; callers generally only need to distinguish
/// `Transient` (retry later) from everything else.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("version conflict writing {0}")]
    Conflict(String),

    #[error("transient store error: {0}")]
    Transient(String),

    #[error("store connection permanently lost after {0}s")]
    Fatal(String),

    #[error("lock contention on {0}")]
    LockFailed(String),

    #[error("invalid utf-8 in value at {key}")]
    InvalidUtf8 { key: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
