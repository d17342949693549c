//! Error types for the broker

use thiserror::Error;
use vis_core::PatternError;
use vis_ports::{AdapterError, ResolveError};

use crate::infrastructure::config::ConfigError;

pub const BAD_REQUEST: u16 = 400;
pub const NOT_AUTHORIZED: u16 = 401;
pub const FORBIDDEN: u16 = 403;
pub const NOT_FOUND: u16 = 404;

/// Everything a client request can fail with.
///
/// Messages are worded so that the substring classifier in
/// [`classify_message`] yields the same number as [`VisError::number`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VisError {
    #[error("{0}")]
    InvalidPattern(#[from] PatternError),

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("not authorized to access {0}")]
    NotAuthorized(String),

    #[error("session does not have permissions for {0}")]
    Forbidden(String),

    #[error("path is read-only: {0}")]
    ReadOnlyViolation(String),

    #[error("token is not authorized: {0}")]
    AuthFailed(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("path {path} is already registered by adapter {owner}")]
    DuplicatePath { path: String, owner: String },

    #[error("bad request: {0}")]
    BadRequest(String),
}

impl VisError {
    /// Error number carried in the error frame
    pub fn number(&self) -> u16 {
        match self {
            VisError::PathNotFound(_) | VisError::SubscriptionNotFound(_) => NOT_FOUND,
            VisError::NotAuthorized(_) | VisError::AuthFailed(_) => NOT_AUTHORIZED,
            VisError::Forbidden(_) => FORBIDDEN,
            // Adapter messages are opaque text.
            VisError::AdapterUnavailable(msg) => classify_message(msg),
            VisError::InvalidPattern(_)
            | VisError::ReadOnlyViolation(_)
            | VisError::DuplicatePath { .. }
            | VisError::BadRequest(_) => BAD_REQUEST,
        }
    }

    pub fn reason(&self) -> &'static str {
        reason_for(self.number())
    }
}

/// Pick an error number from free-form error text
pub fn classify_message(message: &str) -> u16 {
    let lower = message.to_lowercase();
    if lower.contains("not found") || lower.contains("not exist") {
        NOT_FOUND
    } else if lower.contains("not authorized") {
        NOT_AUTHORIZED
    } else if lower.contains("not have permissions") {
        FORBIDDEN
    } else {
        BAD_REQUEST
    }
}

pub fn reason_for(number: u16) -> &'static str {
    match number {
        NOT_AUTHORIZED => "not_authorized",
        FORBIDDEN => "forbidden",
        NOT_FOUND => "not_found",
        _ => "bad_request",
    }
}

impl From<AdapterError> for VisError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::PathNotFound(path) => VisError::PathNotFound(path),
            AdapterError::ReadOnly(path) => VisError::ReadOnlyViolation(path),
            AdapterError::Unavailable(msg) | AdapterError::InvalidConfig(msg) => {
                VisError::AdapterUnavailable(msg)
            }
        }
    }
}

impl From<ResolveError> for VisError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Denied(msg) => VisError::AuthFailed(msg),
            ResolveError::Unavailable(msg) => VisError::AdapterUnavailable(msg),
        }
    }
}

/// Startup failures
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Registry error: {0}")]
    Registry(#[from] VisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
