//! JSON file state store with atomic replace-on-write.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

use crate::{
    StateDocument,
    traits::{StateStore, StoreError},
};

const TMP_SUFFIX: &str = "tmp";

/// Stores the document as pretty-printed JSON at a fixed path.
///
/// Each save goes to its own sibling temp file which is then renamed over the
/// target, so concurrent saves never share a partially written file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by `path`. Nothing is touched until the first load or save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("state.json");
        self.path
            .with_file_name(format!(".{name}.{}.{TMP_SUFFIX}", Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<StateDocument, StoreError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateDocument::default());
            }
            Err(e) => return Err(e.into()),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(StateDocument::default());
        }
        Ok(serde_json::from_slice(&data)?)
    }

    async fn save(&self, document: &StateDocument) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(document)?;
        let tmp_path = self.tmp_path();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&json).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, &self.path).await
        }
        .await;
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        tracing::trace!(path = %self.path.display(), bytes = json.len(), "State document saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use super::*;
    use crate::{ActionQueueItem, DelegationStatus};

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let doc = store.load().await.unwrap();
        assert_eq!(doc, StateDocument::default());
    }

    #[tokio::test]
    async fn test_save_replaces_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = JsonFileStore::new(&path);

        let mut doc = StateDocument::default();
        doc.queue.push(ActionQueueItem::new("check inbox", "test"));
        doc.agent.busy = true;
        store.save(&doc).await.unwrap();

        doc.queue.clear();
        store.save(&doc).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.queue.is_empty());
        assert!(loaded.agent.busy);
        assert_eq!(entries(path.parent().unwrap()), ["state.json"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_never_corrupt_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = Arc::new(JsonFileStore::new(&path));

        let saves: Vec<_> = (1..=16)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let mut doc = StateDocument::default();
                    for i in 0..n {
                        doc.queue.push(ActionQueueItem::new(format!("cmd {i}"), "test"));
                    }
                    store.save(&doc).await
                })
            })
            .collect();
        for save in saves {
            tokio_test::assert_ok!(save.await.unwrap());
        }

        let loaded = store.load().await.unwrap();
        assert!((1..=16).contains(&loaded.queue.len()));
        assert_eq!(entries(dir.path()), ["state.json"]);
    }

    #[tokio::test]
    async fn test_reads_camel_case_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{"delegations":[{"id":"d1","targetTab":"t","task":"x","modelName":null,
                "modelIndex":null,"timeoutMs":5,"status":"timeout","createdAt":1,
                "startedAt":2,"acceptedAt":null,"completedAt":null,"result":null,
                "error":"late"}]}"#,
        )
        .unwrap();

        let doc = JsonFileStore::new(&path).load().await.unwrap();
        assert_eq!(doc.delegations.len(), 1);
        assert_eq!(doc.delegations[0].status, DelegationStatus::Timeout);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, StoreError::Json(_)));
    }
}
