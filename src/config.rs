use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::RecorderError;
use crate::sync::ReconcilePolicy;

/// Returns the value of the named environment variable.
pub fn get_variable(name: &str) -> Result<String, RecorderError> {
    env::var(name).map_err(|_| RecorderError::MissingVariable {
        name: name.to_owned(),
    })
}

/// Returns the value of the named environment variable, if it is set
/// and not empty.
pub fn get_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parses an optional environment variable, falling back to `default`.
pub fn parse_optional<T: FromStr>(name: &str, default: T) -> Result<T, RecorderError> {
    match get_optional(name) {
        Some(value) => value
            .parse()
            .map_err(|_| RecorderError::InvalidVariable {
                name: name.to_owned(),
                value,
            }),
        None => Ok(default),
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Holds the recordings directory and the key-value files.
    pub data_dir: PathBuf,

    /// Scratch space for backups and restores.
    pub cache_dir: PathBuf,

    pub db_connection_string: String,

    pub auth_url: String,

    pub auth_anon_key: String,

    pub reconcile_policy: ReconcilePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, RecorderError> {
        let data_dir = PathBuf::from(get_variable("PROREC_DATA_DIR")?);
        let cache_dir = get_optional("PROREC_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("cache"));

        Ok(Config {
            data_dir,
            cache_dir,
            db_connection_string: get_variable("PROREC_DB_CONNECTION_STRING")?,
            auth_url: get_variable("PROREC_AUTH_URL")?,
            auth_anon_key: get_variable("PROREC_AUTH_ANON_KEY")?,
            reconcile_policy: parse_optional("PROREC_RECONCILE_POLICY", ReconcilePolicy::default())?,
        })
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    /// The general key-value file: recordings index and settings.
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join("storage.json")
    }

    /// The key-value file standing in for the platform's secure storage.
    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_values_fall_back() {
        env::remove_var("PROREC_TEST_UNSET_POLICY");

        let policy = parse_optional("PROREC_TEST_UNSET_POLICY", ReconcilePolicy::Merge)
            .expect("parse missing variable");

        assert_eq!(policy, ReconcilePolicy::Merge);
    }

    #[test]
    fn invalid_values_are_reported() {
        env::set_var("PROREC_TEST_BAD_POLICY", "sometimes");

        let result = parse_optional("PROREC_TEST_BAD_POLICY", ReconcilePolicy::Merge);

        assert!(matches!(
            result,
            Err(RecorderError::InvalidVariable { ref value, .. }) if value == "sometimes"
        ));
    }
}
