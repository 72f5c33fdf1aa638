use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn, Logger};
use time::Date;

use crate::auth::{AuthProvider, Credentials, User};
use crate::backup::{Backup, Picker, Share};
use crate::clock::Clock;
use crate::db::RecordingsTable;
use crate::errors::{ErrorKind, RecorderError};
use crate::kv::KeyValueStore;
use crate::local::LocalStore;
use crate::recorder::{Mirror, Recorder};
use crate::recording::Recording;
use crate::session::Session;
use crate::settings::{NotificationPermissions, SettingsService};
use crate::store::BlobStore;
use crate::sync::{ReconcilePolicy, ReconcileReport, Reconciler};

/// The collaborators an `Environment` is built from.
pub struct Backends {
    /// General storage: the recordings index and settings.
    pub storage: Arc<dyn KeyValueStore>,

    /// Secure storage for auth tokens.
    pub secrets: Arc<dyn KeyValueStore>,

    pub table: Arc<dyn RecordingsTable>,
    pub blobs: Arc<dyn BlobStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub permissions: Arc<dyn NotificationPermissions>,
    pub clock: Arc<dyn Clock>,
}

/// Everything the application does, wired together.
pub struct Environment {
    pub logger: Arc<Logger>,
    pub session: Session,
    pub recorder: Recorder,
    pub reconciler: Reconciler,
    pub settings: SettingsService,
    pub backup: Backup,
    local: Arc<LocalStore>,
}

impl Environment {
    pub fn new(
        logger: Arc<Logger>,
        backends: Backends,
        recordings_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        policy: ReconcilePolicy,
    ) -> Result<Self, RecorderError> {
        let local = Arc::new(LocalStore::new(
            logger.clone(),
            backends.storage.clone(),
            recordings_dir,
        )?);

        let recorder = Recorder::new(
            logger.clone(),
            local.clone(),
            backends.table.clone(),
            backends.blobs.clone(),
            backends.clock,
        )?;

        let reconciler = Reconciler::new(
            logger.clone(),
            local.clone(),
            backends.table,
            backends.blobs,
            policy,
        );

        Ok(Environment {
            session: Session::new(logger.clone(), backends.auth, backends.secrets),
            settings: SettingsService::new(logger.clone(), backends.storage, backends.permissions),
            backup: Backup::new(logger.clone(), cache_dir),
            logger,
            recorder,
            reconciler,
            local,
        })
    }

    pub fn user(&self) -> Option<&User> {
        self.session.user()
    }

    /// Loads settings and picks up any stored session. An unreachable
    /// auth service leaves the app signed out rather than failing.
    pub async fn resume(&mut self) -> Result<Option<User>, RecorderError> {
        if let Err(e) = self.settings.load().await {
            warn!(self.logger, "Could not load settings: {}", e);
        }

        match self.session.restore().await {
            Ok(user) => Ok(user),
            Err(e) if e.kind() == ErrorKind::Remote => {
                warn!(self.logger, "Continuing signed out: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Resumes, then reconciles if someone is signed in.
    pub async fn start(&mut self) -> Result<Option<ReconcileReport>, RecorderError> {
        match self.resume().await? {
            Some(_) => self.on_user_changed().await,
            None => Ok(None),
        }
    }

    /// Brings local state in line with whoever is signed in now. A user
    /// gets their remote recordings; no user gets an empty device.
    pub async fn on_user_changed(&mut self) -> Result<Option<ReconcileReport>, RecorderError> {
        let user = self.session.user().cloned();

        match user {
            Some(user) => {
                let report = self.reconciler.reconcile(Some(&user)).await?;
                self.recorder.reload()?;
                Ok(Some(report))
            }
            None => {
                info!(self.logger, "No user; clearing local recordings");
                self.recorder.clear_local()?;
                Ok(None)
            }
        }
    }

    pub async fn sign_in(
        &mut self,
        credentials: &Credentials,
    ) -> Result<Option<ReconcileReport>, RecorderError> {
        self.session.sign_in(credentials).await?;
        self.on_user_changed().await
    }

    /// Registers an account. Returns `None` while it awaits confirmation.
    pub async fn sign_up(
        &mut self,
        credentials: &Credentials,
    ) -> Result<Option<ReconcileReport>, RecorderError> {
        match self.session.sign_up(credentials).await? {
            Some(_) => self.on_user_changed().await,
            None => Ok(None),
        }
    }

    /// Signs out and clears the device, even if the service could not be
    /// told.
    pub async fn sign_out(&mut self) -> Result<(), RecorderError> {
        let result = self.session.sign_out().await;
        self.on_user_changed().await?;
        result
    }

    /// Pull-to-refresh.
    pub async fn refresh(&mut self) -> Result<ReconcileReport, RecorderError> {
        let user = self.session.user().cloned();
        let report = self.reconciler.reconcile(user.as_ref()).await?;
        self.recorder.reload()?;

        Ok(report)
    }

    pub async fn record(&mut self, captured: &Path) -> Result<(Recording, Mirror), RecorderError> {
        self.recorder.record(self.session.user(), captured).await
    }

    pub async fn rename(&mut self, id: &str, name: &str) -> Result<Option<Mirror>, RecorderError> {
        self.recorder.rename(self.session.user(), id, name).await
    }

    pub async fn delete(&mut self, id: &str) -> Result<Option<Mirror>, RecorderError> {
        self.recorder.delete(self.session.user(), id).await
    }

    /// Archives every recording and offers the archive for sharing.
    pub async fn backup(&self, share: &dyn Share, today: Date) -> Result<PathBuf, RecorderError> {
        let path = self.backup.backup(self.recorder.recordings(), today)?;
        self.backup.share(share, &path).await?;

        Ok(path)
    }

    /// Restores a picked archive. Returns how many recordings were new.
    pub async fn restore(&mut self, picker: &dyn Picker) -> Result<usize, RecorderError> {
        let restored = self.backup.restore(picker, &self.local).await?;
        self.recorder.merge_restored(restored)
    }
}
