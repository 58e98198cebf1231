//! JSON-file document store and intent journal.
//!
//! Keeps every user document and the pending deferred writes in one JSON
//! file. Each mutation rewrites the file through a temp file and a rename,
//! so a crash leaves either the old or the new contents on disk.
//!
//! Several processes may share one file. Every call takes an `fs2` lock on
//! the sidecar `<file>.lock` (shared for reads, exclusive for writes) and
//! reloads the file under it, so revision checks see the other processes'
//! writes. A lock held elsewhere surfaces as `StoreError::Unavailable` and
//! is retried by the caller's backoff policy.
//!
//! ```json
//! {
//!   "users": [
//!     { "userId": "alice", "username": "Alice", "friends": ["bob"],
//!       "sentFriendRequests": [], "receivedFriendRequests": [], "_revision": 3 }
//!   ],
//!   "pendingWrites": []
//! }
//! ```

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{DocumentSnapshot, RecordPatch, StoreError, UserId, UserRecord};
use crate::ports::{DeferredWrite, DocumentStore, IntentId, IntentJournal};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredUser {
    #[serde(flatten)]
    record: UserRecord,
    #[serde(rename = "_revision", default)]
    revision: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    #[serde(default)]
    users: Vec<StoredUser>,
    #[serde(default)]
    pending_writes: Vec<DeferredWrite>,
}

#[derive(Clone, Debug, Default)]
struct State {
    users: BTreeMap<UserId, StoredUser>,
    pending: Vec<DeferredWrite>,
}

impl State {
    fn from_file(file: StoreFile) -> Self {
        Self {
            users: file
                .users
                .into_iter()
                .map(|user| (user.record.user_id.clone(), user))
                .collect(),
            pending: file.pending_writes,
        }
    }

    fn to_file(&self) -> StoreFile {
        StoreFile {
            users: self.users.values().cloned().collect(),
            pending_writes: self.pending.clone(),
        }
    }
}

#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Advisory lock on the sidecar file, released on drop.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path, mode: LockMode) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))?;

        let locked = match mode {
            LockMode::Shared => FileExt::try_lock_shared(&file),
            LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
        };
        locked.map_err(|_| {
            StoreError::Unavailable(format!("{} is locked by another process", path.display()))
        })?;

        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// File-backed store for the operator CLI and local development.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Last state read from or written to disk. Also serializes callers
    /// within this process.
    state: Mutex<State>,
}

impl JsonFileStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path);
        ensure_parent(&path)?;

        let state = {
            let _lock = FileLock::acquire(&lock_path, LockMode::Shared)?;
            load(&path)?
        };

        debug!(
            path = %path.display(),
            users = state.users.len(),
            pending = state.pending.len(),
            "opened json store"
        );

        Ok(Self {
            path,
            lock_path,
            state: Mutex::new(state),
        })
    }

    /// Writes an empty store file. Refuses to overwrite an existing one.
    pub fn initialize<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path);
        ensure_parent(&path)?;

        {
            let _lock = FileLock::acquire(&lock_path, LockMode::Exclusive)?;
            if path.exists() {
                return Err(StoreError::Io(format!("{} already exists", path.display())));
            }
            save(&path, &State::default())?;
        }

        Ok(Self {
            path,
            lock_path,
            state: Mutex::new(State::default()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads from a fresh load of the file.
    fn read<T>(&self, view: impl FnOnce(&State) -> T) -> Result<T, StoreError> {
        let mut guard = self.state.lock();
        let _lock = FileLock::acquire(&self.lock_path, LockMode::Shared)?;
        *guard = load(&self.path)?;
        Ok(view(&guard))
    }

    /// Reloads the file under the exclusive lock, applies `mutate` to a copy
    /// and persists it. The cached state only changes once the file is
    /// written.
    fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut State) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.state.lock();
        let _lock = FileLock::acquire(&self.lock_path, LockMode::Exclusive)?;
        let current = load(&self.path)?;
        let mut next = current.clone();
        *guard = current;
        let value = mutate(&mut next)?;
        save(&self.path, &next)?;
        *guard = next;
        Ok(value)
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string())),
        None => Ok(()),
    }
}

fn load(path: &Path) -> Result<State, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let file: StoreFile = serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            Ok(State::from_file(file))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(State::default()),
        Err(e) => Err(StoreError::Io(e.to_string())),
    }
}

fn save(path: &Path, state: &State) -> Result<(), StoreError> {
    use std::io::Write;

    let bytes = serde_json::to_vec_pretty(&state.to_file())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path).map_err(|e| StoreError::Io(e.to_string()))?;
    file.write_all(&bytes)
        .map_err(|e| StoreError::Io(e.to_string()))?;
    file.sync_all().map_err(|e| StoreError::Io(e.to_string()))?;

    std::fs::rename(&temp_path, path).map_err(|e| StoreError::Io(e.to_string()))
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn fetch(&self, id: &UserId) -> Result<DocumentSnapshot, StoreError> {
        self.read(|state| {
            state.users.get(id).map(|user| DocumentSnapshot {
                record: user.record.clone(),
                revision: user.revision,
            })
        })?
        .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn create(&self, record: UserRecord) -> Result<DocumentSnapshot, StoreError> {
        self.commit(|state| {
            if state.users.contains_key(&record.user_id) {
                return Err(StoreError::AlreadyExists(record.user_id.clone()));
            }
            let user = StoredUser {
                record: record.clone(),
                revision: 1,
            };
            state.users.insert(record.user_id.clone(), user);
            Ok(DocumentSnapshot {
                record,
                revision: 1,
            })
        })
    }

    async fn update_fields(
        &self,
        id: &UserId,
        patch: &RecordPatch,
        expected_revision: Option<u64>,
    ) -> Result<u64, StoreError> {
        self.commit(|state| {
            let user = state
                .users
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if let Some(expected) = expected_revision {
                if expected != user.revision {
                    return Err(StoreError::Conflict {
                        id: id.clone(),
                        expected,
                        actual: user.revision,
                    });
                }
            }
            patch.apply_to(&mut user.record.relationships);
            user.revision += 1;
            Ok(user.revision)
        })
    }

    async fn list_ids(&self) -> Result<Vec<UserId>, StoreError> {
        self.read(|state| state.users.keys().cloned().collect())
    }
}

#[async_trait]
impl IntentJournal for JsonFileStore {
    async fn record(&self, write: &DeferredWrite) -> Result<(), StoreError> {
        self.commit(|state| {
            if !state.pending.iter().any(|p| p.id == write.id) {
                state.pending.push(write.clone());
            }
            Ok(())
        })
    }

    async fn pending(&self) -> Result<Vec<DeferredWrite>, StoreError> {
        self.read(|state| state.pending.clone())
    }

    async fn resolve(&self, id: &IntentId) -> Result<bool, StoreError> {
        if !self.read(|state| state.pending.iter().any(|p| p.id == *id))? {
            return Ok(false);
        }
        self.commit(|state| {
            let before = state.pending.len();
            state.pending.retain(|p| p.id != *id);
            Ok(state.pending.len() != before)
        })
    }

    async fn mark_attempted(&self, id: &IntentId) -> Result<(), StoreError> {
        self.commit(|state| {
            if let Some(entry) = state.pending.iter_mut().find(|p| p.id == *id) {
                entry.attempts += 1;
            }
            Ok(())
        })
    }
}
