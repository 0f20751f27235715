//! Top-level error type.

use crate::config::ConfigError;
use thiserror::Error;
use tickfsm_core::CoreError;
use tickfsm_storage::StorageError;

/// Errors surfaced by the host-facing API.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("target state still active after {limit} turns")]
    TurnLimitExceeded { limit: u64 },
}
