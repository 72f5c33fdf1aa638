use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use futures::future::{BoxFuture, FutureExt};
use uuid::Uuid;

use crate::auth::{AuthProvider, AuthSession, Credentials, User};
use crate::errors::RecorderError;

/// An authentication service kept in memory.
#[derive(Default)]
pub struct MockAuth {
    accounts: RwLock<HashMap<String, (String, User)>>,
    tokens: RwLock<HashMap<String, User>>,
    refresh_tokens: RwLock<HashMap<String, User>>,
    unreachable: AtomicBool,
}

impl MockAuth {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers an account directly, returning its user.
    pub fn add_account(&self, email: &str, password: &str) -> User {
        let user = User::new(Uuid::new_v4(), Some(email.to_owned()));
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.insert(email.to_owned(), (password.to_owned(), user.clone()));
        user
    }

    /// Invalidates every issued token.
    pub fn revoke_all(&self) {
        self.expire_access_tokens();
        self.refresh_tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Invalidates access tokens only, as if they had timed out.
    pub fn expire_access_tokens(&self) {
        self.tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RecorderError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(RecorderError::RemoteUnavailable)
        } else {
            Ok(())
        }
    }

    fn issue(&self, user: User) -> AuthSession {
        let access_token = format!("access-{}", Uuid::new_v4());
        let refresh_token = format!("refresh-{}", Uuid::new_v4());

        self.tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(access_token.clone(), user.clone());
        self.refresh_tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(refresh_token.clone(), user.clone());

        AuthSession {
            access_token,
            refresh_token,
            user,
        }
    }
}

impl AuthProvider for MockAuth {
    fn sign_up(
        &self,
        credentials: &Credentials,
    ) -> BoxFuture<Result<Option<AuthSession>, RecorderError>> {
        let credentials = credentials.clone();

        async move {
            self.check()?;

            let exists = self
                .accounts
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains_key(&credentials.email);

            if exists {
                return Err(RecorderError::AuthRejected {
                    message: "User already registered".to_owned(),
                });
            }

            let user = self.add_account(&credentials.email, &credentials.password);
            Ok(Some(self.issue(user)))
        }
        .boxed()
    }

    fn sign_in(&self, credentials: &Credentials) -> BoxFuture<Result<AuthSession, RecorderError>> {
        let credentials = credentials.clone();

        async move {
            self.check()?;

            let user = {
                let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());

                match accounts.get(&credentials.email) {
                    Some((password, user)) if *password == credentials.password => user.clone(),
                    _ => {
                        return Err(RecorderError::AuthRejected {
                            message: "Invalid login credentials".to_owned(),
                        })
                    }
                }
            };

            Ok(self.issue(user))
        }
        .boxed()
    }

    fn sign_out(&self, access_token: &str) -> BoxFuture<Result<(), RecorderError>> {
        let access_token = access_token.to_owned();

        async move {
            self.check()?;

            self.tokens
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&access_token);

            Ok(())
        }
        .boxed()
    }

    fn user(&self, access_token: &str) -> BoxFuture<Result<User, RecorderError>> {
        let access_token = access_token.to_owned();

        async move {
            self.check()?;

            let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());

            tokens
                .get(&access_token)
                .cloned()
                .ok_or_else(|| RecorderError::AuthRejected {
                    message: "Invalid token".to_owned(),
                })
        }
        .boxed()
    }

    fn refresh(&self, refresh_token: &str) -> BoxFuture<Result<AuthSession, RecorderError>> {
        let refresh_token = refresh_token.to_owned();

        async move {
            self.check()?;

            let user = self
                .refresh_tokens
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&refresh_token)
                .ok_or_else(|| RecorderError::AuthRejected {
                    message: "Invalid Refresh Token".to_owned(),
                })?;

            Ok(self.issue(user))
        }
        .boxed()
    }
}
