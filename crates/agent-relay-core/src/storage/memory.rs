//! In-memory state store.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::{
    StateDocument,
    traits::{StateStore, StoreError},
};

/// In-memory storage implementation.
///
/// Useful for tests and throwaway deployments.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    document: RwLock<Option<StateDocument>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with a document.
    #[must_use]
    pub fn with_document(document: StateDocument) -> Self {
        Self {
            document: RwLock::new(Some(document)),
        }
    }

    /// The last saved document, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<StateDocument> {
        self.document.read().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<StateDocument, StoreError> {
        Ok(self
            .document
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .clone()
            .unwrap_or_default())
    }

    async fn save(&self, document: &StateDocument) -> Result<(), StoreError> {
        *self
            .document
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))? = Some(document.clone());
        Ok(())
    }
}
