//! Domain models and types for shrsync.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`HealthId`], [`FeedUrl`], [`Catchment`])
//! - **Clinical input** ([`ClinicalEncounter`], [`ObservationNode`], [`Order`])
//! - **Produced output** ([`ProducedResource`], [`Bundle`])
//! - **Identity mappings** ([`IdMapping`], [`MappingType`])
//! - **Error types** ([`SyncError`], [`RegistryError`]) and the [`Result`] alias
//!
//! # Type Safety
//!
//! ```rust
//! use shrsync::domain::{FeedUrl, HealthId};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let hid = HealthId::new("98001046534")?;
//! let feed = FeedUrl::new("https://shr.example.org/catchments/3026/encounters")?;
//!
//! // let wrong: HealthId = feed;  // Compile error!
//! # Ok(())
//! # }
//! ```

pub mod encounter;
pub mod errors;
pub mod feed;
pub mod ids;
pub mod mapping;
pub mod patient;
pub mod resource;
pub mod result;

pub use encounter::{
    ClinicalEncounter, Concept, ConceptReference, DrugDosing, Location, ObsValue, ObservationNode,
    Order, OrderAction, OrderRef, OrderType, Provider, Visit,
};
pub use errors::{EventErrorDetail, RegistryError, SyncError};
pub use feed::{EntryContent, FeedEntry, FeedPage};
pub use ids::{Catchment, FeedUrl, HealthId};
pub use mapping::{IdMapping, MappingSchema, MappingType};
pub use patient::{Address, Gender, LocalPatient, PatientDocument};
pub use resource::{urn, Bundle, ProducedResource, ResourceRef};
pub use result::Result;
