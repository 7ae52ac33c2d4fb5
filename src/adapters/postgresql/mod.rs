//! PostgreSQL storage backend
//!
//! Identity mappings, feed markers and failed events in PostgreSQL, with
//! transactions for the multi-row operations.

pub mod adapter;
pub mod client;
pub mod models;

pub use adapter::PostgreSQLAdapter;
pub use client::PostgreSQLClient;
pub use models::{PostgreSQLFailedEvent, PostgreSQLMapping, PostgreSQLMarker};
