//! Storage for failing examples, replayed before new ones are generated.
//!
//! Values are opaque byte strings (encoded choice streams) filed under a
//! [`DatabaseKey`]. Saving the same value twice is a no-op and deleting a
//! value that is not there is not an error.

use crate::error::DatabaseError;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// SHA-256 digest identifying one test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatabaseKey([u8; 32]);

impl DatabaseKey {
    /// Key for the test `name`, refined by `signature` (for instance the names of its rules)
    pub fn new(name: &str, signature: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(signature);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex()[..16])
    }
}

fn hex(bytes: &[u8]) -> String {
    use fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// A store of failing examples
pub trait ExampleDatabase: Send + Sync {
    /// Record `value` under `key`
    fn save(&self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()>;

    /// Every value stored under `key`, in a stable order
    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>>;

    /// Forget `value` under `key`
    fn delete(&self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()>;
}

/// Process-local database, mostly for tests
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    entries: Mutex<HashMap<DatabaseKey, BTreeSet<Vec<u8>>>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored values across all keys
    pub fn len(&self) -> usize {
        self.lock().values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DatabaseKey, BTreeSet<Vec<u8>>>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ExampleDatabase for InMemoryDatabase {
    fn save(&self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        self.lock().entry(*key).or_default().insert(value.to_vec());
        Ok(())
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        Ok(self
            .lock()
            .get(key)
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn delete(&self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let mut entries = self.lock();
        if let Some(values) = entries.get_mut(key) {
            values.remove(value);
            if values.is_empty() {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

/// One directory per key, one file per value, named by the value's digest
#[derive(Debug, Clone)]
pub struct DirectoryDatabase {
    root: PathBuf,
}

impl DirectoryDatabase {
    /// Open (creating if needed) a database rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> DatabaseResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| DatabaseError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &DatabaseKey) -> PathBuf {
        self.root.join(&key.to_hex()[..16])
    }

    fn value_path(&self, key: &DatabaseKey, value: &[u8]) -> PathBuf {
        let digest = Sha256::digest(value);
        self.key_dir(key).join(&hex(&digest)[..16])
    }
}

impl ExampleDatabase for DirectoryDatabase {
    fn save(&self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir).map_err(|e| DatabaseError::io(&dir, e))?;

        let path = self.value_path(key, value);
        if path.exists() {
            return Ok(());
        }

        // Write to a sibling temp file and rename so readers never see a partial value.
        let tmp = path.with_extension("tmp");
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| DatabaseError::io(&path, e))
    }

    fn fetch(&self, key: &DatabaseKey) -> DatabaseResult<Vec<Vec<u8>>> {
        let dir = self.key_dir(key);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DatabaseError::io(&dir, e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| DatabaseError::io(&dir, e))?.path();
            if path.extension().is_none() && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| fs::read(&path).map_err(|e| DatabaseError::io(&path, e)))
            .collect()
    }

    fn delete(&self, key: &DatabaseKey, value: &[u8]) -> DatabaseResult<()> {
        let path = self.value_path(key, value);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DatabaseError::io(&path, e)),
        }
    }
}
