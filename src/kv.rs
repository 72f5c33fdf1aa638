use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tempfile::NamedTempFile;

use crate::errors::RecorderError;

/// A flat, string-keyed persistence layer.
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, RecorderError>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), RecorderError>;

    /// Removes `key`. Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), RecorderError>;
}

/// Keeps every key in one JSON object on disk.
///
/// Each write replaces the whole file through a temporary sibling, so
/// readers see either the old or the new contents.
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileKeyValueStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<BTreeMap<String, String>, RecorderError> {
        match fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|source| {
                RecorderError::MalformedStorage {
                    path: self.path.clone(),
                    source,
                }
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(RecorderError::io(&self.path, e)),
        }
    }

    fn write(&self, map: &BTreeMap<String, String>) -> Result<(), RecorderError> {
        let raw = serde_json::to_vec(map).map_err(|source| RecorderError::Serialization {
            what: "key-value store",
            source,
        })?;

        let directory = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory).map_err(|e| RecorderError::io(&directory, e))?;

        let mut file =
            NamedTempFile::new_in(&directory).map_err(|e| RecorderError::io(&directory, e))?;
        file.write_all(&raw)
            .map_err(|e| RecorderError::io(file.path(), e))?;
        file.persist(&self.path)
            .map_err(|e| RecorderError::io(&self.path, e.error))?;

        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, RecorderError> {
        Ok(self.read()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RecorderError> {
        let mut map = self.read()?;
        map.insert(key.to_owned(), value.to_owned());
        self.write(&map)
    }

    fn remove(&self, key: &str) -> Result<(), RecorderError> {
        let mut map = self.read()?;

        if map.remove(key).is_some() {
            self.write(&map)?;
        }

        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryKeyValueStore {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, RecorderError> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), RecorderError> {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), RecorderError> {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.remove(key);
        Ok(())
    }
}
