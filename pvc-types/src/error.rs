use thiserror::Error;

/// Errors raised while parsing or validating entity fields stored under the cluster's
/// hierarchical key-value store.
#[derive(Debug, Error)]
pub enum TypeError {
    #[error("invalid value {value:?} for field {field}")]
    InvalidField { field: &'static str, value: String },

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid key {0:?}")]
    InvalidKey(String),
}
