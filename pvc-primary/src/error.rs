use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrimaryError {
    #[error("command failed: {0}")]
    Command(String),

    #[error("store error: {0}")]
    Store(#[from] pvc_store::StoreError),
}

pub type PrimaryResult<T> = Result<T, PrimaryError>;
