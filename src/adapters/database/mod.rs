//! Storage abstraction layer
//!
//! Trait-based access to identity mappings, feed markers and failed events,
//! so the sync engine works against PostgreSQL or process memory alike.

pub mod factory;
pub mod traits;

pub use factory::{create_storage, Storage};
pub use traits::{FailedEventStorage, MappingStorage, MarkerStorage, RecordOutcome};
