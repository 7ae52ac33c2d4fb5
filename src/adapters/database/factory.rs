//! Storage factory
//!
//! Creates the storage backend selected by `database_target`.

use crate::adapters::database::traits::{FailedEventStorage, MappingStorage, MarkerStorage};
use crate::adapters::memory::MemoryStorage;
use crate::adapters::postgresql::adapter::PostgreSQLAdapter;
use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::config::schema::{DatabaseTarget, ShrSyncConfig};
use crate::domain::{Result, SyncError};
use std::sync::Arc;

/// One backend seen through each of the storage traits
#[derive(Clone)]
pub struct Storage {
    pub mappings: Arc<dyn MappingStorage + Send + Sync>,
    pub markers: Arc<dyn MarkerStorage + Send + Sync>,
    pub failed_events: Arc<dyn FailedEventStorage + Send + Sync>,
}

impl Storage {
    /// Wraps a single backend implementing all three traits
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: MappingStorage + MarkerStorage + FailedEventStorage + Send + Sync + 'static,
    {
        Self {
            mappings: backend.clone(),
            markers: backend.clone(),
            failed_events: backend,
        }
    }
}

/// Create the storage backend from configuration
///
/// The PostgreSQL backend runs its migration before it is returned.
///
/// # Errors
///
/// Returns an error if the pool cannot be created or the schema cannot be applied
pub async fn create_storage(config: &ShrSyncConfig) -> Result<Storage> {
    match config.database_target {
        DatabaseTarget::PostgreSQL => {
            let pg_config = config.postgresql.as_ref().ok_or_else(|| {
                SyncError::Configuration(
                    "postgresql configuration is required when database_target = 'postgresql'"
                        .to_string(),
                )
            })?;

            tracing::info!("Creating PostgreSQL storage");
            let client = PostgreSQLClient::new(pg_config.clone()).await?;
            let adapter = PostgreSQLAdapter::new(client);
            adapter.ensure_schema().await?;

            Ok(Storage::from_backend(Arc::new(adapter)))
        }
        DatabaseTarget::Memory => {
            tracing::warn!("Using in-memory storage; markers and mappings are lost on exit");
            Ok(Storage::from_backend(Arc::new(MemoryStorage::new())))
        }
    }
}
