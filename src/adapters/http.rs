//! Shared HTTP plumbing for the registry, feed and EMR clients

use crate::config::RetryConfig;
use crate::domain::{RegistryError, Result, SyncError};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use std::future::Future;
use std::time::Duration;

/// Builds a reqwest client with the configured timeout
///
/// Certificate validation is only switched off when `tls_verify` is false,
/// which configuration validation forbids in production.
pub fn build_client(timeout_seconds: u64, tls_verify: bool) -> Result<Client> {
    let mut builder = ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_seconds))
        .connect_timeout(Duration::from_secs(timeout_seconds.min(30)))
        .user_agent(concat!("shrsync/", env!("CARGO_PKG_VERSION")));

    if !tls_verify {
        tracing::warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| SyncError::Configuration(format!("Failed to build HTTP client: {e}")))
}

/// `Authorization` value for basic authentication
pub fn basic_auth_header(username: &str, password: &str) -> String {
    use base64::Engine;
    let credentials = format!("{username}:{password}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials)
    )
}

/// Maps a transport error
pub fn send_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        RegistryError::Timeout(err.to_string()).into()
    } else {
        RegistryError::ConnectionFailed(err.to_string()).into()
    }
}

/// Turns non-success statuses into [`RegistryError`]s
pub async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{context}: {body}");
    let err = match status {
        StatusCode::UNAUTHORIZED => RegistryError::Unauthorized(message),
        StatusCode::NOT_FOUND => RegistryError::NotFound(message),
        s if s.is_server_error() => RegistryError::ServerError {
            status: s.as_u16(),
            message,
        },
        s => RegistryError::ClientError {
            status: s.as_u16(),
            message,
        },
    };
    Err(err.into())
}

/// Delay before retry number `attempt` (1-based)
pub fn backoff_delay(retry: &RetryConfig, attempt: usize) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let factor = retry.backoff_multiplier.powi(exponent);
    let delay_ms = (retry.initial_delay_ms as f64 * factor).min(retry.max_delay_ms as f64);
    Duration::from_millis(delay_ms as u64)
}

/// Retries an operation with exponential backoff
///
/// Only errors that report [`SyncError::is_retryable`] are retried; anything
/// else, a 401 in particular, is returned at once.
pub async fn retry_request<F, T, Fut>(retry: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = retry.max_retries.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts || !e.is_retryable() {
                    return Err(e);
                }

                let delay = backoff_delay(retry, attempt);
                crate::log_retry_attempt!(attempt, max_attempts, e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
