//! External system integrations for shrsync.
//!
//! - [`database`] - Storage traits for mappings, markers and failed events
//! - [`postgresql`] - PostgreSQL implementation of the storage traits
//! - [`memory`] - In-memory implementation, for tests and trial runs
//! - [`http`] - Shared reqwest client setup and retry
//! - [`identity`] - Identity server session
//! - [`feed`] - Change feed client
//! - [`shr`] - Shared health record and patient registry
//! - [`emr`] - Local EMR
//!
//! # Design Pattern
//!
//! Every remote sits behind a trait so the sync engine and its workers can be
//! driven by in-memory fakes in tests.
//!
//! ```rust,no_run
//! use shrsync::adapters::feed::{FeedAuth, FeedSource, HttpFeedClient};
//! use shrsync::adapters::identity::HttpIdentitySession;
//! use shrsync::config::load_config;
//! use shrsync::domain::FeedUrl;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("shrsync.toml")?;
//! let session = Arc::new(HttpIdentitySession::new(
//!     config.identity.clone(),
//!     config.shr.timeout_seconds,
//!     config.shr.tls_verify,
//! )?);
//! let feeds = HttpFeedClient::new(
//!     FeedAuth::Session(session),
//!     config.shr.timeout_seconds,
//!     config.shr.tls_verify,
//!     config.shr.retry.clone(),
//! )?;
//!
//! let feed = FeedUrl::new("https://shr.example.org/catchments/3026/encounters")?;
//! let page = feeds.fetch_page(&feed, None, 25).await?;
//! println!("{} entries", page.entries.len());
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod emr;
pub mod feed;
pub mod http;
pub mod identity;
pub mod memory;
pub mod postgresql;
pub mod shr;
