//! Credential store
//!
//! Small key/value persistence for the author's secret key and the custom
//! relay list. The engine only sees the [`CredentialStore`] trait; the CLI
//! uses [`FileStore`] and tests use [`MemoryStore`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::debug;

/// Store key holding the hex secret seed
pub const SECRET_KEY: &str = "secret-key";

/// Store key holding the JSON-encoded custom relay list
pub const RELAY_LIST_KEY: &str = "relay-list";

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Storage I/O error at {path}: {source}")]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The backing file exists but is not a JSON object of strings
    #[error("Corrupt store at {path}: {source}")]
    Corrupt {
        /// File being parsed
        path: PathBuf,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a delete
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Removal {
    /// The key existed and was removed
    Found,
    /// The key was not present
    NotFound,
}

/// Key/value persistence for secrets and settings
///
/// A missing key is an expected state, reported as `Ok(None)` or
/// [`Removal::NotFound`], never as an error.
pub trait CredentialStore: Send + Sync {
    /// Fetch the value stored under `key`
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove `key`
    fn delete(&self, key: &str) -> StoreResult<Removal>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<Removal> {
        (**self).delete(key)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<Removal> {
        match self.entries.lock().unwrap().remove(key) {
            Some(_) => Ok(Removal::Found),
            None => Ok(Removal::NotFound),
        }
    }
}

/// JSON file store
///
/// All entries live in a single `store.json` object inside the data
/// directory. The file is rewritten on every mutation and restricted to the
/// owner on unix, since it holds the secret key.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// File name inside the data directory
    pub const FILE_NAME: &'static str = "store.json";

    /// Open (without creating) the store inside `dir`
    pub fn open(dir: impl AsRef<Path>) -> Self {
        FileStore {
            path: dir.as_ref().join(Self::FILE_NAME),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<BTreeMap<String, String>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> StoreResult<()> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(entries).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // Write beside the target then rename, so a crash never leaves half a file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        restrict_permissions(&tmp).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        debug!(path = %self.path.display(), entries = entries.len(), "store saved");
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().unwrap();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap();
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn delete(&self, key: &str) -> StoreResult<Removal> {
        let _guard = self.lock.lock().unwrap();
        let mut entries = self.load()?;
        if entries.remove(key).is_none() {
            return Ok(Removal::NotFound);
        }
        self.save(&entries)?;
        Ok(Removal::Found)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
