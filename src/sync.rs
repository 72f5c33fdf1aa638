//! Reconciliation of the local recordings with the remote table.
//!
//! Two policies exist. `Rehydrate` throws local state away and rebuilds
//! it from the remote table, so afterwards local exactly mirrors remote.
//! `Merge` only pulls in remote rows whose ID is not known locally and
//! never removes anything.
//!
//! Either way, nothing local changes unless the remote listing succeeds.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, o, warn, Logger};

use crate::auth::User;
use crate::db::RecordingsTable;
use crate::errors::RecorderError;
use crate::local::LocalStore;
use crate::recording::{default_name, validate_id, Recording, RemoteRecording};
use crate::store::BlobStore;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReconcilePolicy {
    /// Wipe local state and rebuild it from remote.
    Rehydrate,

    /// Append remote-only recordings to local state.
    Merge,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        ReconcilePolicy::Rehydrate
    }
}

impl FromStr for ReconcilePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rehydrate" => Ok(ReconcilePolicy::Rehydrate),
            "merge" => Ok(ReconcilePolicy::Merge),
            other => Err(format!("unknown reconcile policy {:?}", other)),
        }
    }
}

impl fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcilePolicy::Rehydrate => write!(f, "rehydrate"),
            ReconcilePolicy::Merge => write!(f, "merge"),
        }
    }
}

/// What a reconciliation did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconcileReport {
    pub policy: ReconcilePolicy,

    /// Descriptors created from remote rows.
    pub added: usize,

    /// Local descriptors discarded before rebuilding.
    pub removed: usize,

    /// Remote rows left out because their audio could not be fetched.
    pub skipped: usize,
}

pub struct Reconciler {
    logger: Arc<Logger>,
    local: Arc<LocalStore>,
    table: Arc<dyn RecordingsTable>,
    blobs: Arc<dyn BlobStore>,
    policy: ReconcilePolicy,
    busy: AtomicBool,
}

/// Clears the busy flag when a reconciliation ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Reconciler {
    pub fn new(
        logger: Arc<Logger>,
        local: Arc<LocalStore>,
        table: Arc<dyn RecordingsTable>,
        blobs: Arc<dyn BlobStore>,
        policy: ReconcilePolicy,
    ) -> Self {
        Reconciler {
            logger,
            local,
            table,
            blobs,
            policy,
            busy: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Brings the local store in line with the user's remote recordings.
    pub async fn reconcile(&self, user: Option<&User>) -> Result<ReconcileReport, RecorderError> {
        let user = user.ok_or(RecorderError::NotAuthenticated)?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RecorderError::ReconciliationInProgress);
        }
        let _guard = BusyGuard(&self.busy);

        let logger = self
            .logger
            .new(o!("user" => user.id.to_string(), "policy" => self.policy.to_string()));

        debug!(logger, "Fetching remote recordings...");
        let rows = self.table.list(&user.id).await?;

        let report = match self.policy {
            ReconcilePolicy::Rehydrate => self.rehydrate(&logger, rows).await?,
            ReconcilePolicy::Merge => self.merge(&logger, rows).await?,
        };

        info!(logger, "Reconciled recordings"; "added" => report.added, "removed" => report.removed, "skipped" => report.skipped);
        Ok(report)
    }

    async fn rehydrate(
        &self,
        logger: &Logger,
        rows: Vec<RemoteRecording>,
    ) -> Result<ReconcileReport, RecorderError> {
        let removed = self.local.load()?.len();
        self.local.clear()?;

        let mut recordings = Vec::with_capacity(rows.len());
        let mut skipped = 0;

        for row in rows {
            match self.materialize(&row, recordings.len() + 1).await {
                Ok(recording) => recordings.push(recording),
                Err(e) => {
                    warn!(logger, "Skipping recording: {}", e; "id" => &row.id);
                    skipped += 1;
                }
            }
        }

        self.local.save(&recordings)?;

        Ok(ReconcileReport {
            policy: ReconcilePolicy::Rehydrate,
            added: recordings.len(),
            removed,
            skipped,
        })
    }

    async fn merge(
        &self,
        logger: &Logger,
        rows: Vec<RemoteRecording>,
    ) -> Result<ReconcileReport, RecorderError> {
        let mut recordings = self.local.load()?;
        let mut added = 0;
        let mut skipped = 0;

        for row in rows {
            if recordings.iter().any(|r| r.id() == row.id) {
                continue;
            }

            match self.materialize(&row, recordings.len() + 1).await {
                Ok(recording) => {
                    recordings.push(recording);
                    added += 1;
                }
                Err(e) => {
                    warn!(logger, "Skipping recording: {}", e; "id" => &row.id);
                    skipped += 1;
                }
            }
        }

        if added > 0 {
            self.local.save(&recordings)?;
        }

        Ok(ReconcileReport {
            policy: ReconcilePolicy::Merge,
            added,
            removed: 0,
            skipped,
        })
    }

    /// Downloads a row's audio and builds the descriptor pointing at it.
    async fn materialize(
        &self,
        row: &RemoteRecording,
        position: usize,
    ) -> Result<Recording, RecorderError> {
        validate_id(&row.id)?;

        let raw = self.blobs.download(&row.file_path).await?;
        let uri = self.local.write_audio(&row.id, &raw)?;

        let name = row
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_name(position));

        Ok(Recording::new(row.id.clone(), uri, name, row.created_at))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::db::memory::MemoryTable;
    use crate::kv::MemoryKeyValueStore;
    use crate::recording::blob_key;
    use crate::store::mock::MockStore;

    struct Fixture {
        user: User,
        local: Arc<LocalStore>,
        table: Arc<MemoryTable>,
        blobs: Arc<MockStore>,
    }

    impl Fixture {
        fn new(directory: &Path) -> Self {
            let local = LocalStore::new(
                Arc::new(log::discard_logger()),
                Arc::new(MemoryKeyValueStore::new()),
                directory,
            )
            .expect("create local store");

            Fixture {
                user: User::new(Uuid::new_v4(), None),
                local: Arc::new(local),
                table: Arc::new(MemoryTable::new()),
                blobs: Arc::new(MockStore::new()),
            }
        }

        fn reconciler(&self, policy: ReconcilePolicy) -> Reconciler {
            Reconciler::new(
                Arc::new(log::discard_logger()),
                self.local.clone(),
                self.table.clone(),
                self.blobs.clone(),
                policy,
            )
        }

        async fn add_remote(&self, id: &str, name: Option<&str>, created_at: i64) {
            let key = blob_key(&self.user.id, id);
            self.blobs.insert(key.clone(), format!("audio {}", id).into_bytes());

            self.table
                .insert(RemoteRecording::new(
                    id.to_owned(),
                    self.user.id,
                    key,
                    name.map(str::to_owned),
                    OffsetDateTime::from_unix_timestamp(created_at),
                ))
                .await
                .expect("insert remote row");
        }

        fn add_local(&self, id: &str) -> Recording {
            let uri = self.local.write_audio(id, b"local").expect("write audio");
            let recording = Recording::new(
                id.to_owned(),
                uri,
                format!("Local {}", id),
                OffsetDateTime::from_unix_timestamp(1),
            );

            let mut recordings = self.local.load().expect("load");
            recordings.push(recording.clone());
            self.local.save(&recordings).expect("save");

            recording
        }
    }

    #[tokio::test]
    async fn requires_a_user() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let fixture = Fixture::new(dir.path());

        let result = fixture
            .reconciler(ReconcilePolicy::Merge)
            .reconcile(None)
            .await;

        assert!(matches!(result, Err(RecorderError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn refuses_to_overlap() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let fixture = Fixture::new(dir.path());
        let reconciler = fixture.reconciler(ReconcilePolicy::Rehydrate);

        reconciler.busy.store(true, Ordering::SeqCst);
        let result = reconciler.reconcile(Some(&fixture.user)).await;
        assert!(matches!(result, Err(RecorderError::ReconciliationInProgress)));

        reconciler.busy.store(false, Ordering::SeqCst);
        reconciler
            .reconcile(Some(&fixture.user))
            .await
            .expect("reconcile once free");
        assert!(!reconciler.is_busy());
    }

    #[tokio::test]
    async fn failed_listing_changes_nothing() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let fixture = Fixture::new(dir.path());
        let before = vec![fixture.add_local("1")];
        fixture.table.set_unavailable(true);

        for policy in &[ReconcilePolicy::Rehydrate, ReconcilePolicy::Merge] {
            let result = fixture.reconciler(*policy).reconcile(Some(&fixture.user)).await;

            assert!(matches!(result, Err(RecorderError::RemoteUnavailable)));
            assert_eq!(fixture.local.load().expect("load"), before);
            assert_eq!(fixture.local.audio_files().expect("list audio").len(), 1);
        }
    }

    #[tokio::test]
    async fn rehydrate_mirrors_remote_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let fixture = Fixture::new(dir.path());
        fixture.add_local("local-only");
        fixture.add_remote("100", Some("Standup"), 100).await;
        fixture.add_remote("200", None, 200).await;
        let reconciler = fixture.reconciler(ReconcilePolicy::Rehydrate);

        let report = reconciler
            .reconcile(Some(&fixture.user))
            .await
            .expect("first reconcile");
        assert_eq!(report.added, 2);
        assert_eq!(report.removed, 1);

        let first = fixture.local.load().expect("load");
        let summary: Vec<_> = first.iter().map(|r| (r.id(), r.name())).collect();
        assert_eq!(summary, vec![("200", "Recording 1"), ("100", "Standup")]);
        assert_eq!(fixture.local.audio_files().expect("list audio").len(), 2);
        assert_eq!(
            std::fs::read(first[1].uri()).expect("read audio"),
            b"audio 100".to_vec()
        );

        reconciler
            .reconcile(Some(&fixture.user))
            .await
            .expect("second reconcile");
        assert_eq!(fixture.local.load().expect("load"), first);
    }

    #[tokio::test]
    async fn rehydrate_skips_missing_audio() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let fixture = Fixture::new(dir.path());
        fixture.add_remote("100", None, 100).await;
        fixture.add_remote("200", None, 200).await;
        fixture.blobs.break_key(blob_key(&fixture.user.id, "200"));

        let report = fixture
            .reconciler(ReconcilePolicy::Rehydrate)
            .reconcile(Some(&fixture.user))
            .await
            .expect("reconcile");

        assert_eq!(report.added, 1);
        assert_eq!(report.skipped, 1);
        let ids: Vec<_> = fixture
            .local
            .load()
            .expect("load")
            .iter()
            .map(|r| r.id().to_owned())
            .collect();
        assert_eq!(ids, vec!["100"]);
    }

    #[tokio::test]
    async fn merge_keeps_local_and_adds_only_new() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let fixture = Fixture::new(dir.path());
        let local_only = fixture.add_local("local-only");
        let shared = fixture.add_local("100");
        fixture.add_remote("100", Some("Remote name"), 100).await;
        fixture.add_remote("200", Some("New"), 200).await;

        let report = fixture
            .reconciler(ReconcilePolicy::Merge)
            .reconcile(Some(&fixture.user))
            .await
            .expect("reconcile");

        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 0);

        let recordings = fixture.local.load().expect("load");
        assert_eq!(recordings.len(), 3);
        assert_eq!(recordings[0], local_only);
        assert_eq!(recordings[1], shared);
        assert_eq!(recordings[2].id(), "200");
        assert_eq!(recordings[2].name(), "New");
        assert_eq!(
            std::fs::read(shared.uri()).expect("read audio"),
            b"local".to_vec()
        );
    }

    #[tokio::test]
    async fn merge_of_identical_sets_changes_nothing() {
        let dir = tempfile::tempdir().expect("create temporary directory");
        let fixture = Fixture::new(dir.path());
        fixture.add_remote("100", Some("A"), 100).await;
        fixture.add_remote("200", Some("B"), 200).await;
        fixture
            .reconciler(ReconcilePolicy::Rehydrate)
            .reconcile(Some(&fixture.user))
            .await
            .expect("initial sync");
        let before = fixture.local.load().expect("load");

        let report = fixture
            .reconciler(ReconcilePolicy::Merge)
            .reconcile(Some(&fixture.user))
            .await
            .expect("merge");

        assert_eq!(report.added, 0);
        assert_eq!(fixture.local.load().expect("load"), before);
    }

    #[test]
    fn policies_parse() {
        assert_eq!("merge".parse(), Ok(ReconcilePolicy::Merge));
        assert_eq!("Rehydrate".parse(), Ok(ReconcilePolicy::Rehydrate));
        assert!("sometimes".parse::<ReconcilePolicy>().is_err());
    }
}
