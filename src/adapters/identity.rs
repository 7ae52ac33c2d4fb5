//! Identity server session
//!
//! Signs in once and caches the access token until a remote answers 401,
//! at which point callers invalidate it and abort their run.

use crate::adapters::http::{build_client, check_status, send_error};
use crate::config::IdentityConfig;
use crate::domain::{RegistryError, Result, SyncError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Mutex;

/// Header carrying the session token
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
/// Header carrying the client id
pub const CLIENT_ID_HEADER: &str = "client_id";
/// Header carrying the account email
pub const FROM_HEADER: &str = "From";

/// Token source for requests to the SHR and the patient registry
#[async_trait]
pub trait IdentitySession: Send + Sync {
    /// Current access token, signing in when none is cached
    async fn token(&self) -> Result<String>;

    /// Drops the cached token
    fn invalidate(&self);

    fn client_id(&self) -> &str;

    fn email(&self) -> &str;
}

/// Adds the session headers to a request
pub async fn authorize(
    request: RequestBuilder,
    session: &dyn IdentitySession,
) -> Result<RequestBuilder> {
    let token = session.token().await?;
    Ok(request
        .header(AUTH_TOKEN_HEADER, token)
        .header(CLIENT_ID_HEADER, session.client_id())
        .header(FROM_HEADER, session.email()))
}

/// Invalidates the session when `result` is a 401
pub fn on_unauthorized<T>(result: Result<T>, session: &dyn IdentitySession) -> Result<T> {
    if let Err(SyncError::Registry(RegistryError::Unauthorized(message))) = &result {
        tracing::warn!(reason = %message, "Remote rejected session token, discarding it");
        session.invalidate();
    }
    result
}

#[derive(Debug, Deserialize)]
struct SigninResponse {
    access_token: String,
}

/// HTTP session against the identity server
pub struct HttpIdentitySession {
    client: Client,
    config: IdentityConfig,
    cached: Mutex<Option<String>>,
}

impl HttpIdentitySession {
    pub fn new(config: IdentityConfig, timeout_seconds: u64, tls_verify: bool) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_seconds, tls_verify)?,
            config,
            cached: Mutex::new(None),
        })
    }

    async fn sign_in(&self) -> Result<String> {
        tracing::debug!(signin_url = %self.config.signin_url, "Signing in to identity server");

        let response = self
            .client
            .post(&self.config.signin_url)
            .header(AUTH_TOKEN_HEADER, self.config.auth_token.expose_secret().as_ref())
            .header(CLIENT_ID_HEADER, &self.config.client_id)
            .form(&[
                ("email", self.config.email.as_str()),
                ("password", self.config.password.expose_secret().as_ref()),
            ])
            .send()
            .await
            .map_err(send_error)?;

        let response = match check_status(response, "identity sign-in").await {
            Err(SyncError::Registry(RegistryError::Unauthorized(msg)))
            | Err(SyncError::Registry(RegistryError::ClientError { message: msg, .. })) => {
                return Err(SyncError::Authentication(msg));
            }
            other => other?,
        };

        let body: SigninResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(format!("sign-in response: {e}")))?;
        if body.access_token.is_empty() {
            return Err(SyncError::Authentication(
                "Identity server returned an empty access token".to_string(),
            ));
        }
        Ok(body.access_token)
    }

    fn cached(&self) -> Result<Option<String>> {
        self.cached
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| SyncError::Other("identity token cache poisoned".to_string()))
    }
}

#[async_trait]
impl IdentitySession for HttpIdentitySession {
    async fn token(&self) -> Result<String> {
        if let Some(token) = self.cached()? {
            return Ok(token);
        }

        let token = self.sign_in().await?;
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(token.clone());
        }
        tracing::info!("Signed in to identity server");
        Ok(token)
    }

    fn invalidate(&self) {
        if let Ok(mut guard) = self.cached.lock() {
            *guard = None;
        }
    }

    fn client_id(&self) -> &str {
        &self.config.client_id
    }

    fn email(&self) -> &str {
        &self.config.email
    }
}

/// Session with a fixed token, for tests and dry runs
pub struct StaticSession {
    token: String,
    client_id: String,
    invalidations: std::sync::atomic::AtomicUsize,
}

impl StaticSession {
    pub fn new(token: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            client_id: client_id.into(),
            invalidations: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentitySession for StaticSession {
    async fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }

    fn invalidate(&self) {
        self.invalidations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn email(&self) -> &str {
        "test@example.org"
    }
}
