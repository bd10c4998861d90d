//! File-backed [`KeyValueStore`].
//!
//! All keys live in one JSON object file (`state.json` next to
//! `config.toml`).  Every write rewrites the whole file through a sibling
//! temp file and a rename, so a crash mid-write leaves the previous
//! contents intact.  A file that no longer parses is replaced on the next
//! write rather than blocking it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::application::{KeyValueStore, StorageError};

/// Default file name inside the config directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Key-value store persisted as a JSON object.
pub struct FileKeyValueStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(StorageError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StorageError::Io { path, source }
        };
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        let json = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!("wrote {} key(s) to {}", map.len(), self.path.display());
        Ok(())
    }

    fn modify(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>) -> bool,
    ) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut map = match self.read_map() {
            Ok(map) => map,
            Err(StorageError::Parse(e)) => {
                warn!("{} is not valid JSON ({e}); rewriting it", self.path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        if change(&mut map) {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.modify(|map| {
            map.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.modify(|map| map.remove(key).is_some())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
