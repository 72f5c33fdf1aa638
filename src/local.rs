use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace, Logger};
use tempfile::NamedTempFile;

use crate::errors::RecorderError;
use crate::kv::KeyValueStore;
use crate::recording::{audio_file_name, validate_id, Recording, AUDIO_EXTENSION};

/// The key under which the recordings index is stored.
pub const RECORDINGS_KEY: &str = "@audio_recordings";

/// The recordings index plus the audio files it refers to.
pub struct LocalStore {
    logger: Arc<Logger>,
    kv: Arc<dyn KeyValueStore>,
    directory: PathBuf,
}

impl LocalStore {
    /// Creates a new instance, creating `directory` if necessary.
    pub fn new(
        logger: Arc<Logger>,
        kv: Arc<dyn KeyValueStore>,
        directory: impl Into<PathBuf>,
    ) -> Result<Self, RecorderError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|e| RecorderError::io(&directory, e))?;

        Ok(LocalStore {
            logger,
            kv,
            directory,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reads the persisted index. A missing index is an empty list.
    pub fn load(&self) -> Result<Vec<Recording>, RecorderError> {
        match self.kv.get(RECORDINGS_KEY)? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|source| RecorderError::MalformedIndex { source })
            }
            None => Ok(vec![]),
        }
    }

    /// Replaces the persisted index with `recordings`.
    pub fn save(&self, recordings: &[Recording]) -> Result<(), RecorderError> {
        let raw = serde_json::to_string(recordings).map_err(|source| {
            RecorderError::Serialization {
                what: "recordings index",
                source,
            }
        })?;

        trace!(self.logger, "Saving recordings index..."; "count" => recordings.len());
        self.kv.set(RECORDINGS_KEY, &raw)
    }

    /// Removes the index and every audio file in the recordings directory.
    pub fn clear(&self) -> Result<(), RecorderError> {
        debug!(self.logger, "Clearing local recordings...");
        self.kv.remove(RECORDINGS_KEY)?;

        for path in self.audio_files()? {
            self.remove_audio(&path)?;
        }

        Ok(())
    }

    /// The path the audio for `id` lives at.
    pub fn audio_path(&self, id: &str) -> PathBuf {
        self.directory.join(audio_file_name(id))
    }

    /// Writes downloaded audio for `id`, replacing any existing file.
    pub fn write_audio(&self, id: &str, raw: &[u8]) -> Result<PathBuf, RecorderError> {
        validate_id(id)?;
        let path = self.audio_path(id);

        let mut file = NamedTempFile::new_in(&self.directory)
            .map_err(|e| RecorderError::io(&self.directory, e))?;
        file.write_all(raw)
            .map_err(|e| RecorderError::io(file.path(), e))?;
        file.persist(&path)
            .map_err(|e| RecorderError::io(&path, e.error))?;

        Ok(path)
    }

    /// Copies an audio file from elsewhere on disk into place for `id`.
    pub fn import_audio(&self, id: &str, source: &Path) -> Result<PathBuf, RecorderError> {
        validate_id(id)?;
        let path = self.audio_path(id);

        if source != path {
            fs::copy(source, &path).map_err(|e| RecorderError::io(source, e))?;
        }

        Ok(path)
    }

    pub fn read_audio(&self, path: &Path) -> Result<Vec<u8>, RecorderError> {
        fs::read(path).map_err(|e| RecorderError::io(path, e))
    }

    /// Deletes an audio file. A file that is already gone is not an error.
    pub fn remove_audio(&self, path: &Path) -> Result<(), RecorderError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RecorderError::io(path, e)),
        }
    }

    /// Lists the audio files in the recordings directory.
    pub fn audio_files(&self) -> Result<Vec<PathBuf>, RecorderError> {
        let entries =
            fs::read_dir(&self.directory).map_err(|e| RecorderError::io(&self.directory, e))?;

        let mut files = vec![];

        for entry in entries {
            let path = entry
                .map_err(|e| RecorderError::io(&self.directory, e))?
                .path();

            let is_audio = path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(AUDIO_EXTENSION);

            if is_audio {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::kv::MemoryKeyValueStore;

    fn store(directory: &Path) -> LocalStore {
        LocalStore::new(
            Arc::new(log::discard_logger()),
            Arc::new(MemoryKeyValueStore::new()),
            directory,
        )
        .expect("create local store")
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let local = store(dir.path());

        assert!(local.load().expect("load empty index").is_empty());

        let recording = Recording::new(
            "1".to_owned(),
            local.audio_path("1"),
            "Recording 1".to_owned(),
            OffsetDateTime::from_unix_timestamp(10),
        );
        local.save(&[recording.clone()]).expect("save index");

        assert_eq!(local.load().expect("load index"), vec![recording]);
    }

    #[test]
    fn clear_removes_index_and_audio_only() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let local = store(dir.path());

        local.write_audio("1", b"one").expect("write audio 1");
        local.write_audio("2", b"two").expect("write audio 2");
        fs::write(dir.path().join("notes.txt"), b"keep").expect("write unrelated file");
        local.save(&[]).expect("save index");

        local.clear().expect("clear");

        assert!(local.load().expect("load after clear").is_empty());
        assert!(local.audio_files().expect("list audio").is_empty());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn removing_missing_audio_is_fine() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let local = store(dir.path());

        local
            .remove_audio(&local.audio_path("404"))
            .expect("remove missing file");
    }

    #[test]
    fn refuses_unsafe_ids() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let local = store(dir.path());

        assert!(matches!(
            local.write_audio("../escape", b""),
            Err(RecorderError::InvalidId(_))
        ));
    }
}
