//! Dispatch error type.

use agent_relay_core::StoreError;

/// Queue and delegation error.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Delegation not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}
