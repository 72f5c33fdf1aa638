use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use mime::Mime;
use structopt::StructOpt;
use time::OffsetDateTime;

use log::{debug, info, initialize_logger, Logger};
use prorec::auth::{Credentials, HttpAuth};
use prorec::backup::{Picker, Share};
use prorec::clock::SystemClock;
use prorec::config::Config;
use prorec::db::PgTable;
use prorec::environment::{Backends, Environment};
use prorec::errors::RecorderError;
use prorec::kv::FileKeyValueStore;
use prorec::recorder::Mirror;
use prorec::settings::{NotificationPermissions, PermissionStatus};
use prorec::store::S3Store;
use prorec::urls::AuthUrls;

#[derive(Debug, StructOpt)]
#[structopt(name = "prorec", about = "Record, organize and back up voice memos.")]
enum Command {
    /// List recordings, newest last
    List {
        /// Only show recordings whose name contains this
        #[structopt(long)]
        search: Option<String>,
    },

    /// Add a captured audio file as a new recording
    Record {
        #[structopt(parse(from_os_str))]
        captured: PathBuf,
    },

    Rename { id: String, name: String },

    Delete { id: String },

    /// Reconcile with the remote copy
    Sync,

    /// Write a backup archive of every recording
    Backup,

    /// Restore recordings from a backup archive
    Restore {
        #[structopt(parse(from_os_str))]
        archive: PathBuf,
    },

    SignIn(Login),

    SignUp(Login),

    SignOut,

    /// Show or change settings
    Settings {
        #[structopt(long)]
        notifications: Option<bool>,

        #[structopt(long)]
        high_quality: Option<bool>,
    },
}

#[derive(Debug, StructOpt)]
struct Login {
    #[structopt(long)]
    email: String,

    #[structopt(long, env = "PROREC_PASSWORD", hide_env_values = true)]
    password: String,
}

impl From<Login> for Credentials {
    fn from(login: Login) -> Self {
        Credentials::new(login.email, login.password)
    }
}

/// Hands archives over by printing where they are.
struct PrintShare;

impl Share for PrintShare {
    fn is_available(&self) -> bool {
        true
    }

    fn share(&self, path: &Path, _: &Mime, _: &str) -> BoxFuture<Result<(), RecorderError>> {
        println!("{}", path.display());
        async { Ok(()) }.boxed()
    }
}

/// "Picks" the archive named on the command line.
struct ArgumentPicker(PathBuf);

impl Picker for ArgumentPicker {
    fn pick(&self, _: &Mime) -> BoxFuture<Result<Option<PathBuf>, RecorderError>> {
        let path = self.0.clone();
        async move { Ok(Some(path)) }.boxed()
    }
}

/// A terminal has no notification prompt to show, so permission is
/// always granted.
struct TerminalPermissions(Arc<Logger>);

impl NotificationPermissions for TerminalPermissions {
    fn status(&self) -> BoxFuture<Result<PermissionStatus, RecorderError>> {
        async { Ok(PermissionStatus::Granted) }.boxed()
    }

    fn request(&self) -> BoxFuture<Result<PermissionStatus, RecorderError>> {
        async { Ok(PermissionStatus::Granted) }.boxed()
    }

    fn set_enabled(&self, enabled: bool) -> BoxFuture<Result<(), RecorderError>> {
        debug!(self.0, "Notification handler updated"; "enabled" => enabled);
        async { Ok(()) }.boxed()
    }
}

fn describe(mirror: &Mirror) -> &'static str {
    match mirror {
        Mirror::Synced => "synced",
        Mirror::LocalOnly => "local only",
        Mirror::Failed(_) => "remote update failed",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    let command = Command::from_args();
    let logger = Arc::new(initialize_logger());
    let config = Config::from_env()?;

    info!(logger, "Starting..."; "data_dir" => %config.data_dir.display(), "policy" => %config.reconcile_policy);

    let table = Arc::new(PgTable::connect(&config.db_connection_string).await?);
    let blobs = Arc::new(S3Store::from_env()?);
    let auth = Arc::new(HttpAuth::new(
        AuthUrls::new(&config.auth_url)?,
        config.auth_anon_key.clone(),
    ));

    let backends = Backends {
        storage: Arc::new(FileKeyValueStore::new(config.storage_path())),
        secrets: Arc::new(FileKeyValueStore::new(config.credentials_path())),
        table,
        blobs,
        auth,
        permissions: Arc::new(TerminalPermissions(logger.clone())),
        clock: Arc::new(SystemClock),
    };

    let mut environment = Environment::new(
        logger.clone(),
        backends,
        config.recordings_dir(),
        config.cache_dir.clone(),
        config.reconcile_policy,
    )?;

    environment.resume().await?;

    match command {
        Command::List { search } => {
            let recordings = match &search {
                Some(query) => environment.recorder.search(query),
                None => environment.recorder.recordings().iter().collect(),
            };

            for recording in recordings {
                println!(
                    "{}\t{}\t{}",
                    recording.id(),
                    recording.date().format("%F %T"),
                    recording.name()
                );
            }
        }
        Command::Record { captured } => {
            let (recording, mirror) = environment.record(&captured).await?;
            println!("{}\t{} ({})", recording.id(), recording.name(), describe(&mirror));
        }
        Command::Rename { id, name } => match environment.rename(&id, &name).await? {
            Some(mirror) => println!("renamed ({})", describe(&mirror)),
            None => println!("no recording {}", id),
        },
        Command::Delete { id } => match environment.delete(&id).await? {
            Some(mirror) => println!("deleted ({})", describe(&mirror)),
            None => println!("no recording {}", id),
        },
        Command::Sync => {
            let report = environment.refresh().await?;
            println!(
                "{}: {} added, {} removed, {} skipped",
                report.policy, report.added, report.removed, report.skipped
            );
        }
        Command::Backup => {
            let today = OffsetDateTime::now_utc().date();
            environment.backup(&PrintShare, today).await?;
        }
        Command::Restore { archive } => {
            let added = environment.restore(&ArgumentPicker(archive)).await?;
            println!("restored {} recordings", added);
        }
        Command::SignIn(login) => {
            environment.sign_in(&login.into()).await?;
            println!("signed in");
        }
        Command::SignUp(login) => {
            environment.sign_up(&login.into()).await?;

            if environment.user().is_some() {
                println!("signed in");
            } else {
                println!("check your email to confirm the account");
            }
        }
        Command::SignOut => {
            environment.sign_out().await?;
            println!("signed out");
        }
        Command::Settings {
            notifications,
            high_quality,
        } => {
            if let Some(value) = notifications {
                environment.settings.toggle_notifications(value).await?;
            }

            if let Some(value) = high_quality {
                environment.settings.toggle_high_quality(value)?;
            }

            let settings = environment.settings.settings();
            println!("notifications: {}", settings.notifications);
            println!("high quality recording: {}", settings.high_quality_recording);
        }
    }

    info!(logger, "Exiting...");

    Ok(())
}
