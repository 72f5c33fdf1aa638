use std::sync::Arc;

use log::{debug, error, info, o, warn, Logger};

use crate::auth::{AuthProvider, AuthSession, Credentials, User};
use crate::errors::RecorderError;
use crate::kv::KeyValueStore;

pub const ACCESS_TOKEN_KEY: &str = "auth.access_token";
pub const REFRESH_TOKEN_KEY: &str = "auth.refresh_token";

/// Who is signed in, and the credentials that prove it.
///
/// Tokens live in `secrets`, the stand-in for the platform's secure
/// storage. A session starts signed out; call `restore` once at startup.
pub struct Session {
    logger: Arc<Logger>,
    provider: Arc<dyn AuthProvider>,
    secrets: Arc<dyn KeyValueStore>,
    user: Option<User>,
    access_token: Option<String>,
}

impl Session {
    pub fn new(
        logger: Arc<Logger>,
        provider: Arc<dyn AuthProvider>,
        secrets: Arc<dyn KeyValueStore>,
    ) -> Self {
        Session {
            logger,
            provider,
            secrets,
            user: None,
            access_token: None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Picks up a session persisted by an earlier run.
    ///
    /// An expired access token is traded in using the stored refresh
    /// token. Tokens the service rejects are deleted. A service that
    /// cannot be reached leaves the stored tokens alone and returns the
    /// error.
    pub async fn restore(&mut self) -> Result<Option<User>, RecorderError> {
        let access_token = match self.secrets.get(ACCESS_TOKEN_KEY)? {
            Some(token) => token,
            None => return Ok(None),
        };

        debug!(self.logger, "Checking stored session...");

        let result = self.provider.user(&access_token).await;

        match result {
            Ok(user) => {
                info!(self.logger, "Restored session"; "user" => %user.id);
                self.user = Some(user.clone());
                self.access_token = Some(access_token);
                Ok(Some(user))
            }
            Err(RecorderError::AuthRejected { message }) => {
                debug!(self.logger, "Access token rejected"; "message" => %message);
                self.refresh().await
            }
            Err(e) => {
                error!(self.logger, "Error checking user session: {}", e);
                Err(e)
            }
        }
    }

    async fn refresh(&mut self) -> Result<Option<User>, RecorderError> {
        let refresh_token = match self.secrets.get(REFRESH_TOKEN_KEY)? {
            Some(token) => token,
            None => {
                warn!(self.logger, "Stored session expired");
                self.forget()?;
                return Ok(None);
            }
        };

        let result = self.provider.refresh(&refresh_token).await;

        match result {
            Ok(session) => {
                info!(self.logger, "Refreshed session"; "user" => %session.user.id);
                self.adopt(session).map(Some)
            }
            Err(RecorderError::AuthRejected { message }) => {
                warn!(self.logger, "Stored session rejected"; "message" => %message);
                self.forget()?;
                Ok(None)
            }
            Err(e) => {
                error!(self.logger, "Error refreshing user session: {}", e);
                Err(e)
            }
        }
    }

    pub async fn sign_in(&mut self, credentials: &Credentials) -> Result<User, RecorderError> {
        let session = self.provider.sign_in(credentials).await?;
        self.adopt(session)
    }

    /// Registers an account. Returns `None` if it still has to be
    /// confirmed, in which case nobody is signed in.
    pub async fn sign_up(&mut self, credentials: &Credentials) -> Result<Option<User>, RecorderError> {
        match self.provider.sign_up(credentials).await? {
            Some(session) => self.adopt(session).map(Some),
            None => {
                info!(self.logger, "Account awaiting confirmation"; "email" => &credentials.email);
                Ok(None)
            }
        }
    }

    /// Signs out locally, then tells the service.
    ///
    /// The local part always happens; a failure revoking the token
    /// remotely is returned after it.
    pub async fn sign_out(&mut self) -> Result<(), RecorderError> {
        let access_token = self.access_token.take();
        let logger = match &self.user {
            Some(user) => self.logger.new(o!("user" => user.id.to_string())),
            None => (*self.logger).clone(),
        };

        self.forget()?;

        if let Some(token) = access_token {
            if let Err(e) = self.provider.sign_out(&token).await {
                warn!(logger, "Could not revoke session: {}", e);
                return Err(e);
            }
        }

        info!(logger, "Signed out");
        Ok(())
    }

    fn adopt(&mut self, session: AuthSession) -> Result<User, RecorderError> {
        self.secrets.set(ACCESS_TOKEN_KEY, &session.access_token)?;
        self.secrets.set(REFRESH_TOKEN_KEY, &session.refresh_token)?;

        info!(self.logger, "Signed in"; "user" => %session.user.id);
        self.access_token = Some(session.access_token);
        self.user = Some(session.user.clone());

        Ok(session.user)
    }

    fn forget(&mut self) -> Result<(), RecorderError> {
        self.user = None;
        self.access_token = None;
        self.secrets.remove(ACCESS_TOKEN_KEY)?;
        self.secrets.remove(REFRESH_TOKEN_KEY)
    }
}
