//! Storage error types.

use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("machine not found: {0}")]
    NotFound(String),

    #[error("invalid machine name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("data corruption: {0}")]
    Corruption(String),

    #[error("core error: {0}")]
    Core(#[from] tickfsm_core::CoreError),
}
