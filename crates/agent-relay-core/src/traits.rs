//! Storage contract for the state document.

use async_trait::async_trait;
use thiserror::Error;

use crate::StateDocument;

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Durable load/save of the whole state document.
///
/// Implementations must replace the stored document atomically: a reader
/// never observes a half-written save.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the stored document, or a default one if nothing is stored yet.
    async fn load(&self) -> Result<StateDocument, StoreError>;

    /// Replace the stored document.
    async fn save(&self, document: &StateDocument) -> Result<(), StoreError>;
}
