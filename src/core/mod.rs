//! Core logic of shrsync.
//!
//! # Modules
//!
//! - [`mapping`] - Identity mapping store
//! - [`assembler`] - Encounter bundle assembly
//! - [`sync`] - Feed markers, failed events, workers and the run coordinator
//!
//! # Sync Workflow
//!
//! 1. **Load marker**: position of the feed in durable storage
//! 2. **Read entries**: pages after the marker, oldest first
//! 3. **Apply**: push to the registry/SHR or pull into the local EMR
//! 4. **Map**: record local-to-remote ids for later references
//! 5. **Checkpoint**: advance the marker, or park the entry as a failed event
//! 6. **Report**: per-feed counters and the run summary

pub mod assembler;
pub mod mapping;
pub mod sync;
