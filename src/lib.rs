// shrsync - Shared Health Record synchronization client
// Copyright (c) 2025 shrsync Contributors
// Licensed under the MIT License

//! # shrsync - Shared Health Record synchronization
//!
//! shrsync keeps a facility's local EMR in step with a national shared health
//! record (SHR) and patient registry.
//!
//! ## Overview
//!
//! - **Push**: local patients are registered with the patient registry;
//!   local encounters are assembled into Composition bundles and submitted
//!   to the SHR
//! - **Pull**: patients and encounters of the facility's catchments are
//!   read from registry feeds and imported into the local EMR
//! - **Identity mappings** translate every local id into the id and URI the
//!   registries issued, so later bundles can reference earlier ones
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Mapping store, bundle assembler and feed sync engine
//! - [`adapters`] - Storage backends and HTTP clients
//! - [`domain`] - Core domain types and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shrsync::config::load_config;
//! use shrsync::core::sync::{SyncCoordinator, SyncOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("shrsync.toml")?;
//!     let (_tx, shutdown) = tokio::sync::watch::channel(false);
//!
//!     let coordinator = SyncCoordinator::new(config, shutdown).await?;
//!     let summary = coordinator.execute(&SyncOptions::default()).await?;
//!
//!     println!("Processed {} feed entries", summary.total_processed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feed Markers
//!
//! Each feed keeps a marker: the id of the last entry applied in order.
//! Entries that fail are parked in a bounded failed-event store and retried
//! with `shrsync sync --failed`; the marker does not move past them within
//! the run in which they failed.
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`domain::Result`] with a
//! [`domain::SyncError`]:
//!
//! ```rust,no_run
//! use shrsync::domain::SyncError;
//!
//! fn example() -> Result<(), SyncError> {
//!     let config = shrsync::config::load_config("shrsync.toml")?;
//!     println!("{} catchments", config.sync.catchments.len());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
