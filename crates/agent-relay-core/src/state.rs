//! Explicitly owned state container shared by the relay components.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    StateDocument,
    traits::{StateStore, StoreError},
};

/// Owns the in-memory state document and the store it is persisted to.
///
/// Mutations happen under a short lock that is never held across an await;
/// callers invoke [`StateHandle::persist`] explicitly after each mutation.
/// Saves run one at a time in the order they were requested. Persisting
/// snapshots the whole document, so two handlers that both read-then-write
/// the same field across an await can still lose an update.
pub struct StateHandle {
    document: Mutex<StateDocument>,
    store: Arc<dyn StateStore>,
    save_gate: Mutex<()>,
}

impl StateHandle {
    /// Wrap an already-loaded document.
    #[must_use]
    pub fn new(document: StateDocument, store: Arc<dyn StateStore>) -> Self {
        Self {
            document: Mutex::new(document),
            store,
            save_gate: Mutex::new(()),
        }
    }

    /// Load the document from `store`.
    ///
    /// # Errors
    /// Returns error if the store cannot be read or parsed.
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self, StoreError> {
        let document = store.load().await?;
        tracing::info!(
            queued = document.queue.len(),
            delegations = document.delegations.len(),
            "State document loaded"
        );
        Ok(Self::new(document, store))
    }

    /// Run `f` against the document and return its result.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut StateDocument) -> R) -> R {
        let mut document = self.document.lock().await;
        f(&mut document)
    }

    /// Run `f` against a shared view of the document.
    pub async fn read<R>(&self, f: impl FnOnce(&StateDocument) -> R) -> R {
        let document = self.document.lock().await;
        f(&document)
    }

    /// Clone of the current document.
    pub async fn snapshot(&self) -> StateDocument {
        self.document.lock().await.clone()
    }

    /// Save the current document to the store.
    ///
    /// # Errors
    /// Returns error if the store rejects the write.
    pub async fn persist(&self) -> Result<(), StoreError> {
        // Held across snapshot and save so an older snapshot never lands last.
        let _gate = self.save_gate.lock().await;
        let snapshot = self.snapshot().await;
        self.store.save(&snapshot).await
    }

    /// Save the current document, logging instead of returning a failure.
    pub async fn persist_or_log(&self) {
        if let Err(err) = self.persist().await {
            tracing::error!(%err, "Failed to persist state document");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ActionQueueItem,
        storage::{JsonFileStore, MemoryStore},
    };

    #[tokio::test]
    async fn test_mutation_is_not_saved_until_persist() {
        let store = Arc::new(MemoryStore::new());
        let state = StateHandle::load(store.clone()).await.unwrap();

        let len = state
            .mutate(|doc| {
                doc.queue.push(ActionQueueItem::new("hello", "test"));
                doc.queue.len()
            })
            .await;
        assert_eq!(len, 1);
        assert!(store.snapshot().is_none());

        tokio_test::assert_ok!(state.persist().await);
        assert_eq!(store.snapshot().unwrap().queue.len(), 1);
    }

    #[tokio::test]
    async fn test_load_uses_stored_document() {
        let mut doc = StateDocument::default();
        doc.agent.busy = true;
        let store = Arc::new(MemoryStore::with_document(doc));
        let state = StateHandle::load(store).await.unwrap();
        assert!(state.read(|doc| doc.agent.busy).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persists_leave_latest_document_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let state = Arc::new(StateHandle::new(
            StateDocument::default(),
            Arc::new(JsonFileStore::new(&path)),
        ));

        let writers: Vec<_> = (0..32)
            .map(|i| {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let item = ActionQueueItem::new(format!("cmd {i}"), "test");
                    state.mutate(|doc| doc.queue.push(item)).await;
                    state.persist().await
                })
            })
            .collect();
        for writer in writers {
            tokio_test::assert_ok!(writer.await.unwrap());
        }

        let on_disk = JsonFileStore::new(&path).load().await.unwrap();
        assert_eq!(on_disk.queue.len(), 32);
        assert_eq!(on_disk, state.snapshot().await);
    }
}
