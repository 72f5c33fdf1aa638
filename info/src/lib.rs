/// The package version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The source revision, injected by the build pipeline.
pub const REVISION: Option<&str> = option_env!("PROREC_REVISION");

pub const BUILD_TIMESTAMP: Option<&str> = option_env!("PROREC_BUILD_TIMESTAMP");

/// Name used for the application in user-facing files such as backups.
pub const APP_NAME: &str = "ProRec";
