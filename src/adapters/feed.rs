//! Change feed client
//!
//! Feeds are paged with `?after=<entry id>&limit=<n>` and answer
//! `{"entries": [...]}`, oldest entry first.

use crate::adapters::http::{
    basic_auth_header, build_client, check_status, retry_request, send_error,
};
use crate::adapters::identity::{authorize, on_unauthorized, IdentitySession};
use crate::config::{RetryConfig, SecretString};
use crate::domain::{FeedPage, FeedUrl, RegistryError, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use std::sync::Arc;

/// Source of feed pages
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Entries strictly after `after` (from the start when `None`)
    async fn fetch_page(
        &self,
        feed: &FeedUrl,
        after: Option<&str>,
        limit: usize,
    ) -> Result<FeedPage>;
}

/// How requests to a feed authenticate
#[derive(Clone)]
pub enum FeedAuth {
    /// Local EMR feeds
    Basic {
        username: String,
        password: SecretString,
    },
    /// Catchment feeds of the SHR and the patient registry
    Session(Arc<dyn IdentitySession>),
}

/// HTTP feed client
pub struct HttpFeedClient {
    client: Client,
    auth: FeedAuth,
    retry: RetryConfig,
}

impl HttpFeedClient {
    pub fn new(
        auth: FeedAuth,
        timeout_seconds: u64,
        tls_verify: bool,
        retry: RetryConfig,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_seconds, tls_verify)?,
            auth,
            retry,
        })
    }

    async fn fetch_once(
        &self,
        feed: &FeedUrl,
        after: Option<&str>,
        limit: usize,
    ) -> Result<FeedPage> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let request = self.client.get(feed.as_str()).query(&query);
        let request = match &self.auth {
            FeedAuth::Basic { username, password } => request.header(
                reqwest::header::AUTHORIZATION,
                basic_auth_header(username, password.expose_secret().as_ref()),
            ),
            FeedAuth::Session(session) => authorize(request, session.as_ref()).await?,
        };

        let response = request.send().await.map_err(send_error)?;
        let response = check_status(response, feed.as_str()).await?;
        let page: FeedPage = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(format!("feed page: {e}")))?;
        Ok(page)
    }
}

#[async_trait]
impl FeedSource for HttpFeedClient {
    async fn fetch_page(
        &self,
        feed: &FeedUrl,
        after: Option<&str>,
        limit: usize,
    ) -> Result<FeedPage> {
        let result = retry_request(&self.retry, || self.fetch_once(feed, after, limit)).await;
        match &self.auth {
            FeedAuth::Session(session) => on_unauthorized(result, session.as_ref()),
            FeedAuth::Basic { .. } => result,
        }
    }
}
