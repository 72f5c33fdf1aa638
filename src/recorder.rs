use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, o, Logger};

use crate::auth::User;
use crate::clock::Clock;
use crate::db::RecordingsTable;
use crate::errors::RecorderError;
use crate::local::LocalStore;
use crate::mime_type::AUDIO_M4A;
use crate::normalization::normalize_name;
use crate::recording::{blob_key, default_name, generate_id, Recording, RemoteRecording};
use crate::store::BlobStore;

/// How the remote side fared after a local change went through.
#[derive(Debug)]
pub enum Mirror {
    /// The change reached the remote table and blob store.
    Synced,

    /// Nobody is signed in, so nothing was sent.
    LocalOnly,

    /// The change is kept locally; the remote copy may now differ.
    Failed(RecorderError),
}

impl Mirror {
    pub fn is_synced(&self) -> bool {
        matches!(self, Mirror::Synced)
    }
}

/// The in-memory recordings list and the operations that change it.
///
/// Every change is applied locally and persisted first, then mirrored
/// to the remote side when a user is signed in.
pub struct Recorder {
    logger: Arc<Logger>,
    local: Arc<LocalStore>,
    table: Arc<dyn RecordingsTable>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    recordings: Vec<Recording>,
}

impl Recorder {
    pub fn new(
        logger: Arc<Logger>,
        local: Arc<LocalStore>,
        table: Arc<dyn RecordingsTable>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RecorderError> {
        let recordings = local.load()?;

        Ok(Recorder {
            logger,
            local,
            table,
            blobs,
            clock,
            recordings,
        })
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    /// Re-reads the list, e.g. after a reconciliation rewrote it.
    pub fn reload(&mut self) -> Result<&[Recording], RecorderError> {
        self.recordings = self.local.load()?;
        Ok(&self.recordings)
    }

    /// Recordings whose name contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<&Recording> {
        let query = query.to_lowercase();

        self.recordings
            .iter()
            .filter(|r| r.name().to_lowercase().contains(&query))
            .collect()
    }

    /// Adds the audio captured at `captured` as a new recording.
    pub async fn record(
        &mut self,
        user: Option<&User>,
        captured: &Path,
    ) -> Result<(Recording, Mirror), RecorderError> {
        let now = self.clock.now();
        let id = generate_id(now, &self.recordings);
        let logger = self.logger.new(o!("id" => id.clone()));

        let uri = self.local.import_audio(&id, captured)?;
        let recording = Recording::new(
            id,
            uri,
            default_name(self.recordings.len() + 1),
            now,
        );

        self.recordings.push(recording.clone());

        if let Err(e) = self.local.save(&self.recordings) {
            self.recordings.pop();
            self.local.remove_audio(recording.uri())?;
            return Err(e);
        }

        info!(logger, "Saved recording"; "name" => recording.name());

        let mirror = match user {
            Some(user) => {
                let result = self.upload(user, &recording).await;
                mirror(&logger, "upload", result)
            }
            None => Mirror::LocalOnly,
        };

        Ok((recording, mirror))
    }

    /// Renames a recording. Returns `None` if there is no such recording.
    pub async fn rename(
        &mut self,
        user: Option<&User>,
        id: &str,
        name: &str,
    ) -> Result<Option<Mirror>, RecorderError> {
        let name = normalize_name(name);

        if name.is_empty() {
            return Err(RecorderError::EmptyName);
        }

        let index = match self.position(id) {
            Some(index) => index,
            None => return Ok(None),
        };

        let logger = self.logger.new(o!("id" => id.to_owned()));
        let previous = self.recordings[index].name().to_owned();
        self.recordings[index].set_name(name.clone());

        if let Err(e) = self.local.save(&self.recordings) {
            self.recordings[index].set_name(previous);
            return Err(e);
        }

        debug!(logger, "Renamed recording"; "name" => &name);

        let mirror = match user {
            Some(user) => {
                let result = self.table.update_name(&user.id, id, &name).await;
                mirror(&logger, "rename", result)
            }
            None => Mirror::LocalOnly,
        };

        Ok(Some(mirror))
    }

    /// Deletes a recording everywhere. Returns `None` if there is no such
    /// recording.
    pub async fn delete(
        &mut self,
        user: Option<&User>,
        id: &str,
    ) -> Result<Option<Mirror>, RecorderError> {
        let index = match self.position(id) {
            Some(index) => index,
            None => return Ok(None),
        };

        let logger = self.logger.new(o!("id" => id.to_owned()));
        let recording = self.recordings.remove(index);

        if let Err(e) = self.local.save(&self.recordings) {
            self.recordings.insert(index, recording);
            return Err(e);
        }

        self.local.remove_audio(recording.uri())?;
        info!(logger, "Deleted recording");

        let mirror = match user {
            Some(user) => {
                // try both even if the first fails
                let blob = self.blobs.delete(&blob_key(&user.id, id)).await;
                let row = self.table.delete(&user.id, id).await;
                mirror(&logger, "delete", blob.and(row))
            }
            None => Mirror::LocalOnly,
        };

        Ok(Some(mirror))
    }

    /// Appends restored recordings whose IDs are not already present.
    /// Returns how many were added.
    pub fn merge_restored(&mut self, restored: Vec<Recording>) -> Result<usize, RecorderError> {
        let before = self.recordings.len();

        for recording in restored {
            if self.position(recording.id()).is_none() {
                self.recordings.push(recording);
            }
        }

        let added = self.recordings.len() - before;

        if added > 0 {
            if let Err(e) = self.local.save(&self.recordings) {
                self.recordings.truncate(before);
                return Err(e);
            }
        }

        info!(self.logger, "Merged restored recordings"; "added" => added);
        Ok(added)
    }

    /// Forgets every local recording, e.g. when the user signs out.
    pub fn clear_local(&mut self) -> Result<(), RecorderError> {
        self.local.clear()?;
        self.recordings.clear();
        Ok(())
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.recordings.iter().position(|r| r.id() == id)
    }

    async fn upload(&self, user: &User, recording: &Recording) -> Result<(), RecorderError> {
        let raw = self.local.read_audio(recording.uri())?;
        let row = RemoteRecording::for_recording(&user.id, recording);

        self.blobs
            .upload(row.file_path(), AUDIO_M4A.to_string(), Bytes::from(raw))
            .await?;
        self.table.insert(row).await
    }
}

fn mirror(logger: &Logger, action: &str, result: Result<(), RecorderError>) -> Mirror {
    match result {
        Ok(()) => Mirror::Synced,
        Err(e) => {
            error!(logger, "Remote {} failed: {}", action, e);
            Mirror::Failed(e)
        }
    }
}
