use url::Url;

use crate::errors::RecorderError;

/// Convenience wrapper for the authentication service's endpoints.
#[derive(Clone, Debug)]
pub struct AuthUrls {
    /// Top-level URL, including trailing slash.
    base: Url,
}

impl AuthUrls {
    /// Create a new instance. A missing trailing slash on `base` is added.
    pub fn new(base: impl AsRef<str>) -> Result<Self, RecorderError> {
        let mut raw = base.as_ref().to_owned();

        if !raw.ends_with('/') {
            raw.push('/');
        }

        let base = Url::parse(&raw).map_err(|source| RecorderError::InvalidUrl {
            url: raw.clone(),
            source,
        })?;

        Ok(AuthUrls { base })
    }

    pub fn sign_up(&self) -> Result<Url, RecorderError> {
        self.join("auth/v1/signup")
    }

    pub fn password_token(&self) -> Result<Url, RecorderError> {
        self.join("auth/v1/token?grant_type=password")
    }

    pub fn refresh_token(&self) -> Result<Url, RecorderError> {
        self.join("auth/v1/token?grant_type=refresh_token")
    }

    pub fn sign_out(&self) -> Result<Url, RecorderError> {
        self.join("auth/v1/logout")
    }

    pub fn user(&self) -> Result<Url, RecorderError> {
        self.join("auth/v1/user")
    }

    fn join(&self, path: &str) -> Result<Url, RecorderError> {
        self.base
            .join(path)
            .map_err(|source| RecorderError::InvalidUrl {
                url: format!("{}{}", self.base, path),
                source,
            })
    }
}
