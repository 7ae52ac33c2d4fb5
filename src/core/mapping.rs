//! Identity mapping store
//!
//! [`IdMappingStore`] is the single entry point the assembler and the workers
//! use to translate between local ids and registry-issued ids. Saving is
//! idempotent: replaying the same mapping never creates a second row, and a
//! changed external id re-points the one live row of that internal id.

use crate::adapters::database::traits::MappingStorage;
use crate::domain::ids::HealthId;
use crate::domain::mapping::{IdMapping, MappingType};
use crate::domain::Result;
use chrono::Utc;
use std::sync::Arc;

/// What [`IdMappingStore::save`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// The live row of the internal id now points elsewhere
    Repointed,
    Unchanged,
}

/// Facade over a [`MappingStorage`] backend
#[derive(Clone)]
pub struct IdMappingStore {
    storage: Arc<dyn MappingStorage + Send + Sync>,
}

impl IdMappingStore {
    pub fn new(storage: Arc<dyn MappingStorage + Send + Sync>) -> Self {
        Self { storage }
    }

    /// Probe-then-write save
    ///
    /// - same internal, external and type already stored: nothing happens, even
    ///   when the URI differs (a merge may have rewritten the stored one)
    /// - same internal id and type with another external id: the row is updated
    /// - nothing stored: the mapping is inserted
    pub async fn save(&self, mapping: &IdMapping) -> Result<SaveOutcome> {
        let existing = self
            .storage
            .find_mapping_by_internal_id(&mapping.internal_id, mapping.mapping_type)
            .await?;

        match existing {
            Some(current) if current.same_identity(mapping) => Ok(SaveOutcome::Unchanged),
            Some(current) => {
                let mut updated = mapping.clone();
                if updated.last_sync_time.is_none() {
                    updated.last_sync_time = Some(Utc::now());
                }
                self.storage.update_mapping(&updated).await?;
                tracing::debug!(
                    internal_id = %mapping.internal_id,
                    mapping_type = %mapping.mapping_type,
                    previous_external_id = %current.external_id,
                    external_id = %mapping.external_id,
                    "Re-pointed identity mapping"
                );
                Ok(SaveOutcome::Repointed)
            }
            None => {
                let mut inserted = mapping.clone();
                if inserted.last_sync_time.is_none() {
                    inserted.last_sync_time = Some(Utc::now());
                }
                self.storage.insert_mapping(&inserted).await?;
                Ok(SaveOutcome::Inserted)
            }
        }
    }

    /// Stamps an existing mapping with the current time after a resync
    pub async fn mark_synced(&self, mapping: &IdMapping) -> Result<()> {
        let touched = mapping.clone().with_last_sync_time(Utc::now());
        self.storage.update_mapping(&touched).await
    }

    pub async fn find_by_internal_id(
        &self,
        internal_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>> {
        self.storage
            .find_mapping_by_internal_id(internal_id, mapping_type)
            .await
    }

    pub async fn find_by_external_id(
        &self,
        external_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>> {
        self.storage
            .find_mapping_by_external_id(external_id, mapping_type)
            .await
    }

    pub async fn find_by_health_id(
        &self,
        health_id: &HealthId,
        mapping_type: MappingType,
    ) -> Result<Vec<IdMapping>> {
        self.storage
            .find_mappings_by_health_id(health_id, mapping_type)
            .await
    }

    /// Moves encounter and medication-order mappings from a retired health id
    /// to the surviving one, all rows or none
    pub async fn replace_health_id(&self, old: &HealthId, new: &HealthId) -> Result<usize> {
        if old == new {
            return Ok(0);
        }
        let rewritten = self
            .storage
            .replace_health_id(old, new, Utc::now())
            .await?;
        tracing::info!(
            old_health_id = %old,
            new_health_id = %new,
            rewritten,
            "Applied patient merge to identity mappings"
        );
        Ok(rewritten)
    }

    pub async fn counts(&self) -> Result<Vec<(MappingType, usize)>> {
        self.storage.count_mappings().await
    }

    pub async fn test_connection(&self) -> Result<()> {
        self.storage.test_connection().await
    }
}
