//! Configuration management for shrsync.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! shrsync uses TOML configuration files with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `SHRSYNC_<SECTION>_<KEY>` overrides
//! - Default values for optional settings
//! - Validation on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use shrsync::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("shrsync.toml")?;
//!
//! println!("SHR: {}", config.shr.base_url);
//! println!("Catchments: {:?}", config.sync.catchments);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level and dry run
//! - [`ShrConfig`] - SHR, patient, facility and provider registries
//! - [`IdentityConfig`] - Identity server credentials
//! - [`EmrConfig`] - Local EMR REST endpoint
//! - [`SyncConfig`] - Catchments, feed paths and failed-event capacity
//! - [`AssemblyConfig`] - Facility defaults, visit and encounter type tables
//! - [`PostgreSQLConfig`] - Mapping store database
//! - [`LoggingConfig`] - Log files
//!
//! # Example Configuration
//!
//! ```toml
//! database_target = "postgresql"
//!
//! [shr]
//! base_url = "https://shr.example.org/api/v1"
//! patient_registry_url = "https://mci.example.org/api/v1"
//! facility_registry_url = "https://fr.example.org/api/1.0"
//!
//! [identity]
//! signin_url = "https://idp.example.org/signin"
//! client_id = "18550"
//! auth_token = "${SHRSYNC_AUTH_TOKEN}"
//! email = "facility@example.org"
//! password = "${SHRSYNC_IDP_PASSWORD}"
//!
//! [sync]
//! catchments = ["3026"]
//! local_patient_feed_url = "http://emr.local/openmrs/ws/atomfeed/patient"
//! local_encounter_feed_url = "http://emr.local/openmrs/ws/atomfeed/encounter"
//!
//! [assembly]
//! default_facility_id = "10019841"
//!
//! [postgresql]
//! connection_string = "${SHRSYNC_PG_URL}"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, AssemblyConfig, CodingConfig, ConceptNames, DatabaseTarget, EmrConfig,
    Environment, IdentityConfig, LoggingConfig, PostgreSQLConfig, RetryConfig, ShrConfig,
    ShrSyncConfig, SyncConfig,
};
pub use secret::{secret_string, SecretString, SecretValue};
