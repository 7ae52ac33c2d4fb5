//! Catchment feed sync engine
//!
//! Reads change feeds one entry at a time and hands each entry to a worker:
//!
//! - [`marker`] - Durable per-feed position
//! - [`failed`] - Bounded store of entries that could not be applied
//! - [`processor`] - One feed, one worker: `process_new` and `process_failed`
//! - [`workers`] - Patient and encounter push/pull workers
//! - [`coordinator`] - Runs the configured feeds in order
//! - [`summary`] - Run counters and reporting
//!
//! ```rust,no_run
//! use shrsync::config::load_config;
//! use shrsync::core::sync::{SyncCoordinator, SyncOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("shrsync.toml")?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let coordinator = SyncCoordinator::new(config, shutdown_rx).await?;
//! let summary = coordinator.execute(&SyncOptions::default()).await?;
//! println!("processed {}, failed {}", summary.total_processed(), summary.total_failed());
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod failed;
pub mod marker;
pub mod processor;
pub mod summary;
pub mod workers;

pub use coordinator::{Direction, EntityKind, SyncCoordinator, SyncOptions, SyncServices};
pub use failed::{FailedEvent, FailedEventStore};
pub use marker::{FeedMarker, MarkerManager};
pub use processor::{FeedProcessor, ProcessorOptions, ProcessorStores};
pub use summary::{FeedRunReport, RunMode, SyncErrorType, SyncRunError, SyncSummary};
pub use workers::{EventWorker, WorkOutcome};
