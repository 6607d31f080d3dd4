use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for handler operations
pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

/// Stable error kinds surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A pooled connection could not be obtained, or the transport failed
    ConnectionError,
    /// A downstream service reported a failure
    HandlerError,
    /// An operation against the fast cache failed
    CacheError,
    /// An operation against the durable document store failed
    StoreError,
    /// The inbound request could not be decoded
    InvalidRequest,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionError => "connection_error",
            ErrorCode::HandlerError => "handler_error",
            ErrorCode::CacheError => "cache_error",
            ErrorCode::StoreError => "store_error",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error returned by every handler and every downstream client.
///
/// This is also the wire representation of a failure, so a downstream
/// service's error passes through a handler unchanged.
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[error("{error_code}: {message}")]
pub struct ServiceError {
    pub error_code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
        }
    }

    /// The pool for `dependency` had no client to hand out.
    pub fn connection(dependency: &str) -> Self {
        Self::new(
            ErrorCode::ConnectionError,
            format!("Failed to connect to {dependency}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServiceError::internal(format!("Downstream task failed: {e}"))
    }
}

/// Errors raised while starting or running the service process.
#[derive(Error, Debug)]
pub enum MediaServiceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] crate::config::ValidationError),

    #[error("could not set up downstream client: {0}")]
    Client(#[from] crate::clients::http::ClientError),

    #[error("could not set up cache client: {0}")]
    Cache(#[from] crate::cache::CacheError),
}
