use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::RecorderError;
use crate::urls::AuthUrls;

pub mod mock;

/// The signed-in user.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    pub id: Uuid,

    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    pub fn new(id: Uuid, email: Option<String>) -> Self {
        User { id, email }
    }
}

/// Tokens issued on sign-in, along with the user they belong to.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Clone, Debug, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// The hosted authentication service.
pub trait AuthProvider: Send + Sync {
    /// Registers a new account. Returns `None` when the account must be
    /// confirmed (e.g. by email) before it can sign in.
    fn sign_up(
        &self,
        credentials: &Credentials,
    ) -> BoxFuture<Result<Option<AuthSession>, RecorderError>>;

    fn sign_in(&self, credentials: &Credentials) -> BoxFuture<Result<AuthSession, RecorderError>>;

    /// Revokes the session the token belongs to.
    fn sign_out(&self, access_token: &str) -> BoxFuture<Result<(), RecorderError>>;

    /// Resolves a stored access token to its user.
    fn user(&self, access_token: &str) -> BoxFuture<Result<User, RecorderError>>;

    /// Trades a refresh token for a new session. The old refresh token
    /// is spent either way.
    fn refresh(&self, refresh_token: &str) -> BoxFuture<Result<AuthSession, RecorderError>>;
}

/// Talks to a GoTrue-compatible REST endpoint.
pub struct HttpAuth {
    client: Client,
    urls: AuthUrls,
    anon_key: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(AuthSession),
    Pending(User),
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Default, Deserialize)]
struct ErrorResponse {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl HttpAuth {
    pub fn new(urls: AuthUrls, anon_key: impl Into<String>) -> Self {
        HttpAuth {
            client: Client::new(),
            urls,
            anon_key: anon_key.into(),
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", self.anon_key.as_str())
    }
}

impl AuthProvider for HttpAuth {
    fn sign_up(
        &self,
        credentials: &Credentials,
    ) -> BoxFuture<Result<Option<AuthSession>, RecorderError>> {
        let credentials = credentials.clone();

        async move {
            let request = self.request(self.client.post(self.urls.sign_up()?));
            let response = send(request.json(&credentials)).await?;

            match parse::<SignUpResponse>(response).await? {
                SignUpResponse::Session(session) => Ok(Some(session)),
                SignUpResponse::Pending(_) => Ok(None),
            }
        }
        .boxed()
    }

    fn sign_in(&self, credentials: &Credentials) -> BoxFuture<Result<AuthSession, RecorderError>> {
        let credentials = credentials.clone();

        async move {
            let request = self.request(self.client.post(self.urls.password_token()?));
            let response = send(request.json(&credentials)).await?;

            parse(response).await
        }
        .boxed()
    }

    fn sign_out(&self, access_token: &str) -> BoxFuture<Result<(), RecorderError>> {
        let access_token = access_token.to_owned();

        async move {
            let request = self.request(self.client.post(self.urls.sign_out()?));
            send(request.bearer_auth(access_token)).await?;

            Ok(())
        }
        .boxed()
    }

    fn user(&self, access_token: &str) -> BoxFuture<Result<User, RecorderError>> {
        let access_token = access_token.to_owned();

        async move {
            let request = self.request(self.client.get(self.urls.user()?));
            let response = send(request.bearer_auth(access_token)).await?;

            parse(response).await
        }
        .boxed()
    }

    fn refresh(&self, refresh_token: &str) -> BoxFuture<Result<AuthSession, RecorderError>> {
        let refresh_token = refresh_token.to_owned();

        async move {
            let body = RefreshRequest {
                refresh_token: &refresh_token,
            };
            let request = self.request(self.client.post(self.urls.refresh_token()?));
            let response = send(request.json(&body)).await?;

            parse(response).await
        }
        .boxed()
    }
}

/// Sends the request, turning non-success statuses into `AuthRejected`.
async fn send(request: RequestBuilder) -> Result<Response, RecorderError> {
    let response = request
        .send()
        .await
        .map_err(|source| RecorderError::AuthRequestFailed { source })?;

    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body: ErrorResponse = response.json().await.unwrap_or_default();

    let message = body
        .error_description
        .or(body.msg)
        .or(body.message)
        .or(body.error)
        .unwrap_or_else(|| status.to_string());

    Err(RecorderError::AuthRejected { message })
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, RecorderError> {
    response
        .json()
        .await
        .map_err(|source| RecorderError::AuthRequestFailed { source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_distinguishes_pending_accounts() {
        let pending: SignUpResponse = serde_json::from_str(
            r#"{"id": "6f0b9c1e-3d55-4f4e-9a59-3c7d8b1b2a10", "email": "a@example.com", "aud": "authenticated"}"#,
        )
        .expect("parse pending response");
        assert!(matches!(pending, SignUpResponse::Pending(_)));

        let session: SignUpResponse = serde_json::from_str(
            r#"{
                "access_token": "access",
                "refresh_token": "refresh",
                "token_type": "bearer",
                "user": {"id": "6f0b9c1e-3d55-4f4e-9a59-3c7d8b1b2a10"}
            }"#,
        )
        .expect("parse session response");

        match session {
            SignUpResponse::Session(session) => {
                assert_eq!(session.access_token, "access");
                assert_eq!(session.user.email, None);
            }
            SignUpResponse::Pending(_) => panic!("expected a session"),
        }
    }

    #[test]
    fn refresh_request_carries_only_the_token() {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: "refresh",
        })
        .expect("serialize refresh request");

        assert_eq!(body, serde_json::json!({"refresh_token": "refresh"}));
    }
}
