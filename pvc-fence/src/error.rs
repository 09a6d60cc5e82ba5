use thiserror::Error;

#[derive(Debug, Error)]
pub enum FenceError {
    #[error("command failed: {0}")]
    Command(String),

    #[error("store error: {0}")]
    Store(#[from] pvc_store::StoreError),
}

pub type FenceResult<T> = Result<T, FenceError>;
