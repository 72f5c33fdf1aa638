//! Backup archives: every recording plus a metadata sidecar, in one zip.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, info, o, warn, Logger};
use mime::Mime;
use tempfile::NamedTempFile;
use time::Date;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::errors::RecorderError;
use crate::local::LocalStore;
use crate::mime_type::APPLICATION_ZIP;
use crate::recording::{audio_file_name, validate_id, Recording, SidecarEntry};

/// The name of the metadata entry inside an archive.
pub const SIDECAR_NAME: &str = "metadata.json";

const SHARE_TITLE: &str = "Share Recordings Backup";

/// The platform share sheet.
pub trait Share: Send + Sync {
    fn is_available(&self) -> bool;

    fn share(&self, path: &Path, mime: &Mime, title: &str) -> BoxFuture<Result<(), RecorderError>>;
}

/// The platform document picker. Resolves to `None` if the user cancels.
pub trait Picker: Send + Sync {
    fn pick(&self, mime: &Mime) -> BoxFuture<Result<Option<PathBuf>, RecorderError>>;
}

pub struct Backup {
    logger: Arc<Logger>,
    cache_dir: PathBuf,
}

/// The archive name for a backup taken on `today`.
pub fn backup_file_name(today: Date) -> String {
    format!(
        "{}_Backup_{:04}-{:02}-{:02}.zip",
        info::APP_NAME,
        today.year(),
        today.month(),
        today.day()
    )
}

impl Backup {
    pub fn new(logger: Arc<Logger>, cache_dir: impl Into<PathBuf>) -> Self {
        Backup {
            logger,
            cache_dir: cache_dir.into(),
        }
    }

    /// Writes an archive of `recordings` to the cache directory and
    /// returns its path.
    pub fn backup(&self, recordings: &[Recording], today: Date) -> Result<PathBuf, RecorderError> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| RecorderError::io(&self.cache_dir, e))?;

        let path = self.cache_dir.join(backup_file_name(today));
        let logger = self
            .logger
            .new(o!("archive" => path.display().to_string()));

        let sidecar: Vec<SidecarEntry> = recordings.iter().map(SidecarEntry::from).collect();
        let sidecar = serde_json::to_vec(&sidecar).map_err(|source| {
            RecorderError::Serialization {
                what: "backup metadata",
                source,
            }
        })?;

        let mut file = NamedTempFile::new_in(&self.cache_dir)
            .map_err(|e| RecorderError::io(&self.cache_dir, e))?;

        {
            let mut zip = ZipWriter::new(file.as_file_mut());
            let options = FileOptions::default().compression_method(CompressionMethod::Stored);

            zip.start_file(SIDECAR_NAME, options)?;
            zip.write_all(&sidecar)
                .map_err(|e| RecorderError::io(&path, e))?;

            for recording in recordings {
                debug!(logger, "Adding recording..."; "id" => recording.id());

                let mut audio =
                    File::open(recording.uri()).map_err(|e| RecorderError::io(recording.uri(), e))?;

                zip.start_file(audio_file_name(recording.id()), options)?;
                io::copy(&mut audio, &mut zip).map_err(|e| RecorderError::io(recording.uri(), e))?;
            }

            zip.finish()?;
        }

        file.persist(&path)
            .map_err(|e| RecorderError::io(&path, e.error))?;

        info!(logger, "Created backup"; "count" => recordings.len());
        Ok(path)
    }

    /// Hands an archive to the share sheet.
    pub async fn share(&self, share: &dyn Share, path: &Path) -> Result<(), RecorderError> {
        if !share.is_available() {
            return Err(RecorderError::SharingUnavailable);
        }

        share.share(path, &APPLICATION_ZIP, SHARE_TITLE).await
    }

    /// Asks for an archive and copies its recordings into `local`.
    ///
    /// Returns the restored descriptors without adding them to the index;
    /// that is up to the caller. On failure every audio file this call
    /// created is removed again.
    pub async fn restore(
        &self,
        picker: &dyn Picker,
        local: &LocalStore,
    ) -> Result<Vec<Recording>, RecorderError> {
        let archive = match picker.pick(&APPLICATION_ZIP).await? {
            Some(path) => path,
            None => {
                debug!(self.logger, "Restore cancelled");
                return Ok(vec![]);
            }
        };

        let logger = self
            .logger
            .new(o!("archive" => archive.display().to_string()));

        fs::create_dir_all(&self.cache_dir).map_err(|e| RecorderError::io(&self.cache_dir, e))?;
        let scratch = tempfile::Builder::new()
            .prefix("restore")
            .tempdir_in(&self.cache_dir)
            .map_err(|e| RecorderError::io(&self.cache_dir, e))?;

        let mut created = vec![];
        let result = extract(&archive, scratch.path(), local, &mut created);

        match &result {
            Ok(restored) => info!(logger, "Restored backup"; "count" => restored.len()),
            Err(e) => {
                warn!(logger, "Restore failed: {}", e; "rolled_back" => created.len());

                for path in &created {
                    if let Err(e) = local.remove_audio(path) {
                        warn!(logger, "Could not remove restored file: {}", e);
                    }
                }
            }
        }

        result
    }
}

fn extract(
    archive: &Path,
    scratch: &Path,
    local: &LocalStore,
    created: &mut Vec<PathBuf>,
) -> Result<Vec<Recording>, RecorderError> {
    let file = File::open(archive).map_err(|e| RecorderError::io(archive, e))?;
    let mut archive = ZipArchive::new(file)?;

    let entries: Vec<SidecarEntry> = {
        let sidecar = open_entry(&mut archive, SIDECAR_NAME)?;
        serde_json::from_reader(sidecar).map_err(|source| RecorderError::MalformedSidecar { source })?
    };

    let mut restored = Vec::with_capacity(entries.len());

    for entry in entries {
        validate_id(&entry.id)?;

        let name = audio_file_name(&entry.id);
        let extracted = scratch.join(&name);

        {
            let mut zipped = open_entry(&mut archive, &name)?;
            let mut out = File::create(&extracted).map_err(|e| RecorderError::io(&extracted, e))?;
            io::copy(&mut zipped, &mut out).map_err(|e| RecorderError::io(&extracted, e))?;
        }

        // audio already on this device is left alone
        let existing = local.audio_path(&entry.id);
        let uri = if existing.exists() {
            existing
        } else {
            let uri = local.import_audio(&entry.id, &extracted)?;
            created.push(uri.clone());
            uri
        };

        restored.push(Recording::new(entry.id, uri, entry.name, entry.date));
    }

    Ok(restored)
}

fn open_entry<'a>(
    archive: &'a mut ZipArchive<File>,
    name: &str,
) -> Result<ZipFile<'a>, RecorderError> {
    archive.by_name(name).map_err(|e| match e {
        ZipError::FileNotFound => RecorderError::ArchiveEntryMissing {
            name: name.to_owned(),
        },
        e => e.into(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::FutureExt;
    use time::OffsetDateTime;

    use super::*;
    use crate::kv::MemoryKeyValueStore;

    struct FixedPicker(Option<PathBuf>);

    impl Picker for FixedPicker {
        fn pick(&self, mime: &Mime) -> BoxFuture<Result<Option<PathBuf>, RecorderError>> {
            assert_eq!(mime, &*APPLICATION_ZIP);
            let path = self.0.clone();
            async move { Ok(path) }.boxed()
        }
    }

    struct FakeShare {
        available: bool,
        shared: AtomicBool,
    }

    impl Share for FakeShare {
        fn is_available(&self) -> bool {
            self.available
        }

        fn share(&self, _: &Path, mime: &Mime, title: &str) -> BoxFuture<Result<(), RecorderError>> {
            assert_eq!(mime.essence_str(), "application/zip");
            assert_eq!(title, SHARE_TITLE);
            self.shared.store(true, Ordering::SeqCst);
            async { Ok(()) }.boxed()
        }
    }

    fn local_store(directory: &Path) -> LocalStore {
        LocalStore::new(
            Arc::new(log::discard_logger()),
            Arc::new(MemoryKeyValueStore::new()),
            directory,
        )
        .expect("create local store")
    }

    fn backup(cache_dir: &Path) -> Backup {
        Backup::new(Arc::new(log::discard_logger()), cache_dir)
    }

    fn today() -> Date {
        Date::try_from_ymd(2024, 3, 1).expect("valid date")
    }

    fn recording(local: &LocalStore, id: &str, name: &str) -> Recording {
        let uri = local
            .write_audio(id, format!("audio {}", id).as_bytes())
            .expect("write audio");

        Recording::new(
            id.to_owned(),
            uri,
            name.to_owned(),
            OffsetDateTime::from_unix_timestamp(1_700_000_000),
        )
    }

    /// Names of the entries left in the cache directory.
    fn cache_entries(cache_dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(cache_dir)
            .expect("read cache directory")
            .map(|e| e.expect("read entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn names_archives_by_date() {
        let name = backup_file_name(today());

        assert_eq!(name, "ProRec_Backup_2024-03-01.zip");
        assert!(name.starts_with(info::APP_NAME));
    }

    #[tokio::test]
    async fn backup_then_restore_on_another_device() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let source = local_store(&dir.path().join("source"));
        let recordings = vec![
            recording(&source, "1", "Groceries"),
            recording(&source, "2", "Standup"),
        ];

        let archive = backup(&dir.path().join("cache"))
            .backup(&recordings, today())
            .expect("back up");
        assert_eq!(
            archive.file_name().and_then(|n| n.to_str()),
            Some("ProRec_Backup_2024-03-01.zip")
        );

        let target = local_store(&dir.path().join("target"));
        let target_cache = dir.path().join("target-cache");
        let restored = backup(&target_cache)
            .restore(&FixedPicker(Some(archive)), &target)
            .await
            .expect("restore");

        assert_eq!(restored.len(), 2);
        for (original, copy) in recordings.iter().zip(&restored) {
            assert_eq!(original.id(), copy.id());
            assert_eq!(original.name(), copy.name());
            assert_eq!(original.date(), copy.date());
            assert_eq!(copy.uri(), target.audio_path(copy.id()));
            assert_eq!(
                fs::read(copy.uri()).expect("read restored audio"),
                fs::read(original.uri()).expect("read original audio")
            );
        }

        assert!(cache_entries(&target_cache).is_empty(), "scratch removed");
    }

    #[tokio::test]
    async fn cancelled_pick_restores_nothing() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let local = local_store(&dir.path().join("recordings"));

        let restored = backup(&dir.path().join("cache"))
            .restore(&FixedPicker(None), &local)
            .await
            .expect("restore");

        assert!(restored.is_empty());
    }

    #[tokio::test]
    async fn incomplete_archive_is_rolled_back() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let cache_dir = dir.path().join("cache");
        fs::create_dir_all(&cache_dir).expect("create cache directory");

        let archive = cache_dir.join("broken.zip");
        {
            let file = File::create(&archive).expect("create archive");
            let mut zip = ZipWriter::new(file);
            let options = FileOptions::default().compression_method(CompressionMethod::Stored);

            zip.start_file(SIDECAR_NAME, options).expect("start sidecar");
            zip.write_all(br#"[{"id": "1", "name": "One", "date": 0}, {"id": "2", "name": "Two", "date": 0}]"#)
                .expect("write sidecar");
            zip.start_file("1.m4a", options).expect("start audio");
            zip.write_all(b"one").expect("write audio");
            zip.finish().expect("finish archive");
        }

        let local = local_store(&dir.path().join("recordings"));
        let result = backup(&cache_dir)
            .restore(&FixedPicker(Some(archive)), &local)
            .await;

        assert!(matches!(
            result,
            Err(RecorderError::ArchiveEntryMissing { ref name }) if name == "2.m4a"
        ));
        assert!(local.audio_files().expect("list audio").is_empty());
        assert_eq!(cache_entries(&cache_dir), vec!["broken.zip"]);
    }

    #[tokio::test]
    async fn restore_keeps_existing_audio() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let local = local_store(&dir.path().join("recordings"));
        let original = recording(&local, "1", "One");

        let archive = backup(&dir.path().join("cache"))
            .backup(&[original.clone()], today())
            .expect("back up");
        local.write_audio("1", b"newer").expect("overwrite audio");

        let restored = backup(&dir.path().join("cache"))
            .restore(&FixedPicker(Some(archive)), &local)
            .await
            .expect("restore");

        assert_eq!(restored, vec![original]);
        assert_eq!(
            fs::read(local.audio_path("1")).expect("read audio"),
            b"newer".to_vec()
        );
    }

    #[tokio::test]
    async fn sharing_requires_a_share_sheet() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let backup = backup(dir.path());
        let path = dir.path().join("x.zip");

        let missing = FakeShare {
            available: false,
            shared: AtomicBool::new(false),
        };
        assert!(matches!(
            backup.share(&missing, &path).await,
            Err(RecorderError::SharingUnavailable)
        ));

        let present = FakeShare {
            available: true,
            shared: AtomicBool::new(false),
        };
        backup.share(&present, &path).await.expect("share");
        assert!(present.shared.load(Ordering::SeqCst));
    }
}
