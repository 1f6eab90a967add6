//! Persistent blob storage behind the vault
//!
//! A [`Store`] only ever sees opaque ciphertext keyed by [`AccountId`].
//! Conditional writes (`compare_and_swap`, `remove_if`) are the atomic
//! per-row primitive the vault uses for read-modify-write.

use crate::account::AccountId;
use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Keyed storage of encrypted account blobs.
pub trait Store: Send + Sync {
    /// Reserve a fresh id. Ids are never handed out twice.
    fn allocate_id(&self) -> Result<AccountId>;

    /// Store a blob under a freshly allocated id.
    fn insert(&self, id: AccountId, blob: Vec<u8>) -> Result<()>;

    fn get(&self, id: AccountId) -> Result<Option<Vec<u8>>>;

    /// Every stored row in id order.
    fn scan(&self) -> Result<Vec<(AccountId, Vec<u8>)>>;

    /// Replace the blob at `id` only if it still equals `expected`.
    /// Returns `false` if the row is gone or was changed.
    fn compare_and_swap(&self, id: AccountId, expected: &[u8], blob: Vec<u8>) -> Result<bool>;

    /// Remove the row at `id` only if it still equals `expected`.
    fn remove_if(&self, id: AccountId, expected: &[u8]) -> Result<bool>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Rows {
    next_id: u64,
    rows: BTreeMap<u64, Vec<u8>>,
}

impl Rows {
    fn allocate(&mut self) -> AccountId {
        self.next_id = self.next_id.max(1);
        let id = self.next_id;
        self.next_id += 1;
        AccountId(id)
    }

    fn insert(&mut self, id: AccountId, blob: Vec<u8>) -> Result<()> {
        if id.0 >= self.next_id || self.rows.contains_key(&id.0) {
            return Err(Error::Storage(format!("Id {id} was not allocated")));
        }
        self.rows.insert(id.0, blob);
        Ok(())
    }

    fn compare_and_swap(&mut self, id: AccountId, expected: &[u8], blob: Vec<u8>) -> bool {
        match self.rows.get_mut(&id.0) {
            Some(current) if current.as_slice() == expected => {
                *current = blob;
                true
            }
            _ => false,
        }
    }

    fn remove_if(&mut self, id: AccountId, expected: &[u8]) -> bool {
        if self.rows.get(&id.0).is_some_and(|b| b.as_slice() == expected) {
            self.rows.remove(&id.0);
            true
        } else {
            false
        }
    }

    fn scan(&self) -> Vec<(AccountId, Vec<u8>)> {
        self.rows
            .iter()
            .map(|(id, blob)| (AccountId(*id), blob.clone()))
            .collect()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::Storage("Store lock poisoned".into())
}

/// Process-local store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Rows>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Rows>> {
        self.inner.lock().map_err(poisoned)
    }
}

impl Store for MemoryStore {
    fn allocate_id(&self) -> Result<AccountId> {
        Ok(self.lock()?.allocate())
    }

    fn insert(&self, id: AccountId, blob: Vec<u8>) -> Result<()> {
        self.lock()?.insert(id, blob)
    }

    fn get(&self, id: AccountId) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.rows.get(&id.0).cloned())
    }

    fn scan(&self) -> Result<Vec<(AccountId, Vec<u8>)>> {
        Ok(self.lock()?.scan())
    }

    fn compare_and_swap(&self, id: AccountId, expected: &[u8], blob: Vec<u8>) -> Result<bool> {
        Ok(self.lock()?.compare_and_swap(id, expected, blob))
    }

    fn remove_if(&self, id: AccountId, expected: &[u8]) -> Result<bool> {
        Ok(self.lock()?.remove_if(id, expected))
    }
}

/// On-disk document layout of a [`FileStore`].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    next_id: u64,
    rows: BTreeMap<u64, String>,
}

/// Store persisted as a single JSON document.
///
/// The document on disk is the only state. Every operation re-reads it
/// under an advisory lock on a sibling `.lock` file: shared for reads,
/// exclusive for read-modify-write. Any number of handles, in this
/// process or others, can share one path. A mutation rewrites the
/// document to a temp file and renames it over the original before the
/// lock is released, so a completed write survives a crash and is seen
/// by the next reader.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileStore {
    /// Open the store at `path`. A missing file reads as an empty store
    /// and is created by the first write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file exists but cannot be read
    /// or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self {
            lock_path: sibling(&path, ".lock"),
            path,
        };
        if store.path.exists() {
            let rows = store.read()?;
            debug!(path = %store.path.display(), rows = rows.rows.len(), "Opened vault store");
        } else {
            debug!(path = %store.path.display(), "Opened empty vault store");
        }
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the advisory lock. Released when the returned file drops.
    fn lock(&self, exclusive: bool) -> Result<File> {
        let path = self.path.display();
        let failed = |e: std::io::Error| Error::Storage(format!("Failed to lock {path}: {e}"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(failed)?;
        if exclusive {
            file.lock().map_err(failed)?;
        } else {
            file.lock_shared().map_err(failed)?;
        }
        Ok(file)
    }

    fn read(&self) -> Result<Rows> {
        let _lock = self.lock(false)?;
        load(&self.path)
    }

    /// Reload the document, apply `f` and persist the result, all under
    /// the exclusive lock. Nothing is written if `f` fails or changes
    /// nothing.
    fn mutate<T>(&self, f: impl FnOnce(&mut Rows) -> Result<T>) -> Result<T> {
        let _lock = self.lock(true)?;
        let current = load(&self.path)?;
        let mut next = current.clone();
        let out = f(&mut next)?;
        if next != current {
            save(&self.path, &next)?;
        }
        Ok(out)
    }
}

impl Store for FileStore {
    fn allocate_id(&self) -> Result<AccountId> {
        self.mutate(|rows| Ok(rows.allocate()))
    }

    fn insert(&self, id: AccountId, blob: Vec<u8>) -> Result<()> {
        self.mutate(|rows| rows.insert(id, blob))
    }

    fn get(&self, id: AccountId) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.rows.remove(&id.0))
    }

    fn scan(&self) -> Result<Vec<(AccountId, Vec<u8>)>> {
        Ok(self.read()?.scan())
    }

    fn compare_and_swap(&self, id: AccountId, expected: &[u8], blob: Vec<u8>) -> Result<bool> {
        self.mutate(|rows| Ok(rows.compare_and_swap(id, expected, blob)))
    }

    fn remove_if(&self, id: AccountId, expected: &[u8]) -> Result<bool> {
        self.mutate(|rows| Ok(rows.remove_if(id, expected)))
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn load(path: &Path) -> Result<Rows> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Rows::default()),
        Err(e) => {
            return Err(Error::Storage(format!("Failed to read {}: {e}", path.display())));
        }
    };
    let doc: Document = serde_json::from_str(&text)
        .map_err(|e| Error::Storage(format!("Corrupt store {}: {e}", path.display())))?;

    let mut rows = BTreeMap::new();
    for (id, encoded) in doc.rows {
        let blob = BASE64
            .decode(encoded)
            .map_err(|e| Error::Storage(format!("Corrupt row {id}: {e}")))?;
        rows.insert(id, blob);
    }
    let max_id = rows.keys().next_back().copied().unwrap_or(0);
    Ok(Rows {
        next_id: doc.next_id.max(max_id + 1),
        rows,
    })
}

fn save(path: &Path, rows: &Rows) -> Result<()> {
    let doc = Document {
        next_id: rows.next_id,
        rows: rows
            .rows
            .iter()
            .map(|(id, blob)| (*id, BASE64.encode(blob)))
            .collect(),
    };
    let json = serde_json::to_vec_pretty(&doc).map_err(|e| Error::Storage(e.to_string()))?;

    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, json)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|e| Error::Storage(format!("Failed to write {}: {e}", path.display())))
}
