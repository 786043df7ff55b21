use crate::error::StoreError;
use crate::run::{Run, RunTransition, sort_runs};
use crate::store::RunStore;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Condition a `put` must satisfy against the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    DoesNotExist,
    GenerationMatch(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectData {
    pub bytes: Vec<u8>,
    /// Incremented by every successful `put`; starts at 1.
    pub generation: u64,
}

/// A minimal object storage API with generation-based conditional writes.
#[async_trait]
pub trait ObjectStorage: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<ObjectData>, StoreError>;

    /// Writes `bytes` if `precondition` holds, returning the new generation.
    /// A failed precondition is `StoreError::PreconditionFailed`.
    async fn put(&self, key: &str, bytes: Vec<u8>, precondition: Precondition) -> Result<u64, StoreError>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// The current generation, without reading the payload.
    async fn head(&self, key: &str) -> Result<Option<u64>, StoreError>;
}

fn check(key: &str, current: Option<u64>, precondition: Precondition) -> Result<u64, StoreError> {
    let holds = match precondition {
        Precondition::None => true,
        Precondition::DoesNotExist => current.is_none(),
        Precondition::GenerationMatch(expected) => current == Some(expected),
    };
    if holds {
        Ok(current.unwrap_or(0) + 1)
    } else {
        Err(StoreError::PreconditionFailed(key.to_string()))
    }
}

// --- In-memory ---

#[derive(Debug, Default)]
pub struct InMemoryObjectStorage {
    objects: Mutex<BTreeMap<String, ObjectData>>,
}

impl InMemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
    async fn get(&self, key: &str) -> Result<Option<ObjectData>, StoreError> {
        Ok(self.objects.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, precondition: Precondition) -> Result<u64, StoreError> {
        let mut objects = self.objects.lock().await;
        let generation = check(key, objects.get(key).map(|o| o.generation), precondition)?;
        objects.insert(key.to_string(), ObjectData { bytes, generation });
        Ok(generation)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn head(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.objects.lock().await.get(key).map(|o| o.generation))
    }
}

// --- Local directory ---

const HEADER_LEN: usize = 8;

/// Objects as files under a root directory. Each file holds an 8-byte
/// big-endian generation followed by the payload, and is replaced through
/// a temp file and a rename.
#[derive(Debug)]
pub struct LocalObjectStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalObjectStorage {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(StoreError::io(&root))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StoreError::Corrupt(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }

    async fn read(&self, path: &Path) -> Result<Option<ObjectData>, StoreError> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        if raw.len() < HEADER_LEN {
            return Err(StoreError::Corrupt(format!("{} has no generation header", path.display())));
        }
        let (header, payload) = raw.split_at(HEADER_LEN);
        let mut generation = [0u8; HEADER_LEN];
        generation.copy_from_slice(header);
        Ok(Some(ObjectData {
            bytes: payload.to_vec(),
            generation: u64::from_be_bytes(generation),
        }))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn get(&self, key: &str) -> Result<Option<ObjectData>, StoreError> {
        let path = self.path_for(key)?;
        self.read(&path).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, precondition: Precondition) -> Result<u64, StoreError> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;
        let current = self.read(&path).await?.map(|o| o.generation);
        let generation = check(key, current, precondition)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::io(parent))?;
        }
        let mut contents = Vec::with_capacity(HEADER_LEN + bytes.len());
        contents.extend_from_slice(&generation.to_be_bytes());
        contents.extend_from_slice(&bytes);

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, contents).await.map_err(StoreError::io(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(StoreError::io(&path))?;
        Ok(generation)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // Keys are listed one directory level deep: `dir/name-prefix`.
        let (dir, name_prefix) = match prefix.rsplit_once('/') {
            Some((dir, rest)) => (self.path_for(dir)?, rest),
            None => (self.root.clone(), prefix),
        };
        let key_dir = prefix.rsplit_once('/').map(|(d, _)| format!("{d}/")).unwrap_or_default();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io { path: dir, source: e }),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::io(&dir))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && name.starts_with(name_prefix) && !name.ends_with(".tmp") {
                keys.push(format!("{key_dir}{name}"));
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn head(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.get(key).await?.map(|o| o.generation))
    }
}

// --- Run store ---

const RUN_PREFIX: &str = "runs/";
const PING_KEY: &str = "health/ping";
const MAX_ATTEMPTS: usize = 8;

/// One JSON document per run in object storage. Updates are optimistic:
/// read, apply, then write conditioned on the generation that was read.
#[derive(Debug, Clone)]
pub struct ObjectRunStore {
    storage: Arc<dyn ObjectStorage>,
}

impl ObjectRunStore {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    fn key(run_id: &str) -> String {
        format!("{RUN_PREFIX}{run_id}.json")
    }

    async fn load(&self, key: &str) -> Result<Option<(Run, u64)>, StoreError> {
        match self.storage.get(key).await? {
            Some(object) => Ok(Some((serde_json::from_slice(&object.bytes)?, object.generation))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RunStore for ObjectRunStore {
    fn backend(&self) -> &'static str {
        "object"
    }

    async fn create(&self, run: &Run) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(run)?;
        match self
            .storage
            .put(&Self::key(&run.run_id), bytes, Precondition::DoesNotExist)
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::PreconditionFailed(_)) => Err(StoreError::AlreadyExists(run.run_id.clone())),
            Err(e) => Err(e),
        }
    }

    async fn update(&self, run_id: &str, transition: RunTransition) -> Result<Run, StoreError> {
        let key = Self::key(run_id);
        for attempt in 1..=MAX_ATTEMPTS {
            let (mut run, generation) = self
                .load(&key)
                .await?
                .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
            run.apply(transition.clone())?;
            let bytes = serde_json::to_vec(&run)?;
            match self
                .storage
                .put(&key, bytes, Precondition::GenerationMatch(generation))
                .await
            {
                Ok(_) => return Ok(run),
                Err(StoreError::PreconditionFailed(_)) => {
                    tracing::debug!(run_id, attempt, "Run object changed underneath update; retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::Conflict(run_id.to_string()))
    }

    async fn get(&self, run_id: &str) -> Result<Option<Run>, StoreError> {
        Ok(self.load(&Self::key(run_id)).await?.map(|(run, _)| run))
    }

    async fn list(&self) -> Result<Vec<Run>, StoreError> {
        let mut runs = Vec::new();
        for key in self.storage.list(RUN_PREFIX).await? {
            if let Some((run, _)) = self.load(&key).await? {
                runs.push(run);
            }
        }
        sort_runs(&mut runs);
        Ok(runs)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.storage
            .put(PING_KEY, Vec::new(), Precondition::None)
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
    async fn generation_preconditions_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let backends: Vec<Arc<dyn ObjectStorage>> = vec![
            Arc::new(InMemoryObjectStorage::new()),
            Arc::new(LocalObjectStorage::open(dir.path()).await.unwrap()),
        ];
        for storage in backends {
            let g1 = storage.put("runs/a.json", b"one".to_vec(), Precondition::DoesNotExist).await.unwrap();
            assert_eq!(g1, 1);
            assert!(matches!(
                storage.put("runs/a.json", b"x".to_vec(), Precondition::DoesNotExist).await,
                Err(StoreError::PreconditionFailed(_))
            ));
            assert!(matches!(
                storage.put("runs/a.json", b"x".to_vec(), Precondition::GenerationMatch(7)).await,
                Err(StoreError::PreconditionFailed(_))
            ));
            let g2 = storage.put("runs/a.json", b"two".to_vec(), Precondition::GenerationMatch(1)).await.unwrap();
            assert_eq!(g2, 2);
            assert_eq!(storage.head("runs/a.json").await.unwrap(), Some(2));
            assert_eq!(storage.get("runs/a.json").await.unwrap().unwrap().bytes, b"two".to_vec());
            storage.put("other/b.json", b"".to_vec(), Precondition::None).await.unwrap();
            assert_eq!(storage.list("runs/").await.unwrap(), vec!["runs/a.json".to_string()]);
        }
    }

    #[tokio::test]
    async fn local_keys_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::open(dir.path().join("objects")).await.unwrap();
        assert!(storage.get("../outside").await.is_err());
        assert!(storage.put("/abs", vec![], Precondition::None).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_updates_apply_exactly_one_terminal_state() {
        let store = ObjectRunStore::new(Arc::new(InMemoryObjectStorage::new()));
        let run = Run::queued(fixtures::config());
        store.create(&run).await.unwrap();
        store.update(&run.run_id, RunTransition::Start { at: timestamp() }).await.unwrap();

        let (a, b) = tokio::join!(
            store.update(&run.run_id, RunTransition::Complete { at: timestamp(), artifact_dir: "d".into() }),
            store.update(&run.run_id, RunTransition::Fail { at: timestamp(), error: "e".into() }),
        );
        assert!(a.is_ok() ^ b.is_ok());
        let stored = store.get(&run.run_id).await.unwrap().unwrap();
        assert!(matches!(stored.status, RunStatus::Completed | RunStatus::Failed));
    }
}
