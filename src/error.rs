//! Error types for the sharded store
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Backend Error Enum ==
/// Failure reported by a backing store handle.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Driver-level SQLite failure
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The handle cannot be reached
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// The blocking worker running the query died
    #[error("backend task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The call was abandoned before it took effect
    #[error("backend call interrupted")]
    Interrupted,
}

impl BackendError {
    /// True when the call was abandoned and left the store untouched.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, BackendError::Interrupted)
    }
}

// == Store Error Enum ==
/// Unified error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Key absent or logically expired
    #[error("Key not found or expired: {0}")]
    NotFound(String),

    /// The targeted master or replica handle failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The caller or the store cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid topology or expiry policy
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// True for the cancellation class (`Cancelled` or `Timeout`).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StoreError::Cancelled | StoreError::Timeout(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::Cancelled | StoreError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            StoreError::Backend(_) | StoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
