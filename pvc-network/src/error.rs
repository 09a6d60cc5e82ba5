use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("command failed: {0}")]
    Command(String),

    #[error("store error: {0}")]
    Store(#[from] pvc_store::StoreError),

    #[error("missing required field {0} for network")]
    MissingField(&'static str),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
