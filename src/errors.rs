use std::io;
use std::path::PathBuf;

use rusoto_core::RusotoError;
use rusoto_s3::{DeleteObjectError, GetObjectError, PutObjectError};
use thiserror::Error;

/// Enumerates high-level errors returned by this library.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// A required environment variable is not set.
    #[error("Must define {name} environment variable")]
    MissingVariable { name: String },

    /// An environment variable could not be parsed.
    #[error("Invalid value {value:?} for {name}")]
    InvalidVariable { name: String, value: String },

    /// Represents an SQL error.
    #[error("SQLx error")]
    Sqlx { source: sqlx::Error },

    #[error("Recording ID already exists")]
    IdAlreadyExists,

    #[error("Could not create S3 client: {message}")]
    S3ClientFailed { message: String },

    #[error("Upload failed")]
    UploadFailed { source: RusotoError<PutObjectError> },

    #[error("Download failed")]
    DownloadFailed { source: RusotoError<GetObjectError> },

    #[error("Could not read downloaded body for {key}")]
    DownloadBodyFailed { key: String, source: io::Error },

    #[error("Download of {key} returned no content")]
    EmptyDownload { key: String },

    #[error("Delete failed")]
    DeleteFailed { source: RusotoError<DeleteObjectError> },

    #[error("Blob {key} does not exist")]
    BlobNotFound { key: String },

    /// The remote service could not be reached at all.
    #[error("Remote service unavailable")]
    RemoteUnavailable,

    #[error("Authentication request failed")]
    AuthRequestFailed { source: reqwest::Error },

    /// The authentication service answered, but refused the request.
    #[error("Authentication rejected: {message}")]
    AuthRejected { message: String },

    #[error("Invalid URL {url}")]
    InvalidUrl { url: String, source: url::ParseError },

    #[error("I/O error on {path}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Malformed recordings index")]
    MalformedIndex { source: serde_json::Error },

    #[error("Malformed key-value file {path}")]
    MalformedStorage { path: PathBuf, source: serde_json::Error },

    #[error("Malformed backup metadata")]
    MalformedSidecar { source: serde_json::Error },

    #[error("Could not serialize {what}")]
    Serialization {
        what: &'static str,
        source: serde_json::Error,
    },

    #[error("Archive error")]
    Archive { source: zip::result::ZipError },

    #[error("Backup archive has no entry named {name}")]
    ArchiveEntryMissing { name: String },

    #[error("Permission denied for {what}")]
    PermissionDenied { what: &'static str },

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Reconciliation already in progress")]
    ReconciliationInProgress,

    #[error("Sharing is not available on this device")]
    SharingUnavailable,

    #[error("Recording names cannot be empty")]
    EmptyName,

    #[error("Invalid recording ID {0:?}")]
    InvalidId(String),
}

/// The broad failure classes callers are expected to react to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Network and remote-store failures.
    Remote,

    /// Local file-system and persistence failures.
    Local,

    /// Microphone or notification permissions were refused.
    Permission,

    /// The operation was not attempted because a precondition failed.
    Precondition,
}

impl RecorderError {
    pub fn kind(&self) -> ErrorKind {
        use RecorderError::*;

        match self {
            Sqlx { .. }
            | IdAlreadyExists
            | S3ClientFailed { .. }
            | UploadFailed { .. }
            | DownloadFailed { .. }
            | DownloadBodyFailed { .. }
            | EmptyDownload { .. }
            | DeleteFailed { .. }
            | BlobNotFound { .. }
            | RemoteUnavailable
            | AuthRequestFailed { .. }
            | AuthRejected { .. } => ErrorKind::Remote,
            Io { .. }
            | MalformedIndex { .. }
            | MalformedStorage { .. }
            | MalformedSidecar { .. }
            | Serialization { .. }
            | Archive { .. }
            | ArchiveEntryMissing { .. } => ErrorKind::Local,
            PermissionDenied { .. } => ErrorKind::Permission,
            MissingVariable { .. }
            | InvalidVariable { .. }
            | InvalidUrl { .. }
            | NotAuthenticated
            | ReconciliationInProgress
            | SharingUnavailable
            | EmptyName
            | InvalidId(..) => ErrorKind::Precondition,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RecorderError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<zip::result::ZipError> for RecorderError {
    fn from(source: zip::result::ZipError) -> Self {
        RecorderError::Archive { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(RecorderError::RemoteUnavailable.kind(), ErrorKind::Remote);
        assert_eq!(
            RecorderError::io("/tmp/x", io::Error::new(io::ErrorKind::Other, "boom")).kind(),
            ErrorKind::Local
        );
        assert_eq!(
            RecorderError::PermissionDenied {
                what: "notifications"
            }
            .kind(),
            ErrorKind::Permission
        );
        assert_eq!(RecorderError::NotAuthenticated.kind(), ErrorKind::Precondition);
    }
}
