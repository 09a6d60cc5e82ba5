use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactsError {
    #[error("libvirt connection failed: {0}")]
    Connect(String),

    #[error("libvirt query failed: {0}")]
    Query(String),

    #[error("failed to read {0}: {1}")]
    Proc(&'static str, String),
}

pub type FactsResult<T> = Result<T, FactsError>;
