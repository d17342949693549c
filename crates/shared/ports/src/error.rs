use thiserror::Error;

/// Errors reported by a signal source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("path is read-only: {0}")]
    ReadOnly(String),

    #[error("adapter unavailable: {0}")]
    Unavailable(String),

    #[error("invalid adapter config: {0}")]
    InvalidConfig(String),
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Errors reported by the permission service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("token rejected: {0}")]
    Denied(String),

    #[error("permission service unavailable: {0}")]
    Unavailable(String),
}
