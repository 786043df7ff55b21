use crate::error::StoreError;
use crate::run::{Run, RunTransition, sort_runs};
use crate::store::RunStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

type Index = BTreeMap<String, Run>;

/// Runs kept in one JSON index file on local disk.
///
/// Every write replaces the whole file through a temp file and a rename, and
/// read-check-write sequences hold an in-process lock.
#[derive(Debug)]
pub struct FileRunStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRunStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::io(parent))?;
        }
        tracing::debug!(path = %path.display(), "Opened file run store");
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_index(&self) -> Result<Index, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::new()),
            Err(e) => Err(StoreError::Io {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    async fn write_index(&self, index: &Index) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(index)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await.map_err(StoreError::io(&tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(StoreError::io(&self.path))
    }
}

#[async_trait]
impl RunStore for FileRunStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut index = self.read_index().await?;
        if index.contains_key(&run.run_id) {
            return Err(StoreError::AlreadyExists(run.run_id.clone()));
        }
        index.insert(run.run_id.clone(), run.clone());
        self.write_index(&index).await
    }

    async fn update(&self, run_id: &str, transition: RunTransition) -> Result<Run, StoreError> {
        let _guard = self.lock.lock().await;
        let mut index = self.read_index().await?;
        let run = index
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        run.apply(transition)?;
        let updated = run.clone();
        self.write_index(&index).await?;
        Ok(updated)
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.read_index().await?.remove(run_id))
    }

    async fn list(&self) -> Result<Vec<Run>, StoreError> {
        let mut runs: Vec<Run> = self.read_index().await?.into_values().collect();
        sort_runs(&mut runs);
        Ok(runs)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let meta = tokio::fs::metadata(&dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", dir.display())))?;
        if !meta.is_dir() {
            return Err(StoreError::Unavailable(format!("{} is not a directory", dir.display())));
        }
        self.read_index()
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{fixtures, timestamp};
    use core_types::RunStatus;

    #[tokio::test]
    async fn records_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("runs.json");
        let run = Run::queued(fixtures::config());
        {
            let store = FileRunStore::open(&path).await.unwrap();
            store.create(&run).await.unwrap();
            store
                .update(&run.run_id, RunTransition::Start { at: timestamp() })
                .await
                .unwrap();
        }
        let reopened = FileRunStore::open(&path).await.unwrap();
        let stored = reopened.get(&run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert!(!dir.path().join("state").join("runs.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_index_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();
        let store = FileRunStore::open(&path).await.unwrap();
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
    }
}
