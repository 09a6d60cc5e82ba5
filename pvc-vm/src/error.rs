use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("failed to open libvirt connection to {uri}: {reason}")]
    Connect { uri: String, reason: String },

    #[error("libvirt call failed: {0}")]
    Libvirt(String),

    #[error("store error: {0}")]
    Store(#[from] pvc_store::StoreError),
}

pub type VmResult<T> = Result<T, VmError>;
