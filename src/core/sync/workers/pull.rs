use super::{already_synced, parse_health_id, EventWorker, WorkOutcome};
use crate::adapters::emr::LocalEmr;
use crate::adapters::shr::{PatientRegistry, SharedHealthRecord};
use crate::core::mapping::IdMappingStore;
use crate::domain::mapping::health_id_from_uri;
use crate::domain::{
    EntryContent, FeedEntry, HealthId, IdMapping, MappingType, PatientDocument, Result, SyncError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Creates or updates local patients from the catchment patient feed
///
/// Entries embed the patient document or reference it by health id. Either
/// shape can announce a merge; the processor rewrites the mappings from
/// [`EventWorker::merge_notice`] and `process` then has nothing to import.
pub struct PatientPullWorker {
    registry: Arc<dyn PatientRegistry>,
    emr: Arc<dyn LocalEmr>,
    mappings: IdMappingStore,
    dry_run: bool,
}

impl PatientPullWorker {
    pub fn new(
        registry: Arc<dyn PatientRegistry>,
        emr: Arc<dyn LocalEmr>,
        mappings: IdMappingStore,
        dry_run: bool,
    ) -> Self {
        Self {
            registry,
            emr,
            mappings,
            dry_run,
        }
    }

    async fn document(&self, entry: &FeedEntry) -> Result<PatientDocument> {
        if let Some(doc) = entry.content.as_document() {
            return serde_json::from_value(doc.clone()).map_err(SyncError::from);
        }
        let health_id = entry
            .content
            .referenced_id()
            .ok_or_else(|| SyncError::Feed(format!("Entry {} has no patient", entry.id)))?;
        self.registry
            .fetch_patient(&parse_health_id(health_id)?)
            .await
    }
}

#[async_trait]
impl EventWorker for PatientPullWorker {
    fn name(&self) -> &'static str {
        "patient_pull"
    }

    async fn merge_notice(&self, entry: &FeedEntry) -> Result<Option<(HealthId, HealthId)>> {
        let document = self.document(entry).await?;
        Ok(document
            .merge_notice()
            .map(|(retired, surviving)| (retired.clone(), surviving.clone())))
    }

    async fn process(&self, entry: &FeedEntry) -> Result<WorkOutcome> {
        let document = self.document(entry).await?;
        if let Some((retired, surviving)) = document.merge_notice() {
            tracing::info!(
                retired = %retired,
                surviving = %surviving,
                "Patient merge notice, nothing to import"
            );
            return Ok(WorkOutcome::Unchanged);
        }

        let health_id = document.health_id.clone().ok_or_else(|| {
            SyncError::Validation(format!("Patient in entry {} has no health id", entry.id))
        })?;

        let existing = self
            .mappings
            .find_by_external_id(health_id.as_str(), MappingType::Patient)
            .await?;
        if let Some(mapping) = &existing {
            if already_synced(entry, mapping.last_sync_time) {
                return Ok(WorkOutcome::Unchanged);
            }
        }
        if self.dry_run {
            return Ok(WorkOutcome::Skipped("dry run".to_string()));
        }

        match existing {
            Some(mapping) => {
                self.emr.update_patient(&mapping.internal_id, &document).await?;
                self.mappings.mark_synced(&mapping).await?;
                tracing::info!(health_id = %health_id, patient = %mapping.internal_id, "Updated local patient");
            }
            None => {
                let uuid = self.emr.create_patient(&document).await?;
                let mapping = IdMapping::new(
                    &uuid,
                    health_id.as_str(),
                    MappingType::Patient,
                    self.registry.patient_uri(&health_id),
                );
                self.mappings.save(&mapping).await?;
                tracing::info!(health_id = %health_id, patient = %uuid, "Imported patient");
            }
        }
        Ok(WorkOutcome::Synced)
    }
}

/// Imports SHR encounters from the catchment encounter feed
///
/// Entries reference the encounter by its SHR URI, or embed
/// `{"uri": ..., "bundle": ...}`.
pub struct EncounterPullWorker {
    shr: Arc<dyn SharedHealthRecord>,
    emr: Arc<dyn LocalEmr>,
    mappings: IdMappingStore,
    dry_run: bool,
}

struct RemoteEncounter {
    health_id: HealthId,
    shr_id: String,
    bundle: Option<Value>,
}

impl EncounterPullWorker {
    pub fn new(
        shr: Arc<dyn SharedHealthRecord>,
        emr: Arc<dyn LocalEmr>,
        mappings: IdMappingStore,
        dry_run: bool,
    ) -> Self {
        Self {
            shr,
            emr,
            mappings,
            dry_run,
        }
    }

    fn locate(entry: &FeedEntry) -> Result<RemoteEncounter> {
        let (uri, bundle) = match &entry.content {
            EntryContent::Reference(uri) => (uri.clone(), None),
            EntryContent::Document(doc) => {
                let uri = doc["uri"].as_str().ok_or_else(|| {
                    SyncError::Feed(format!("Encounter document in entry {} has no uri", entry.id))
                })?;
                (uri.to_string(), Some(doc["bundle"].clone()))
            }
        };

        let health_id = health_id_from_uri(&uri).ok_or_else(|| {
            SyncError::Feed(format!("Cannot read a health id from encounter URI {uri}"))
        })?;
        let shr_id = uri
            .split(['?', '#'])
            .next()
            .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
            .filter(|id| !id.is_empty() && *id != "encounters")
            .ok_or_else(|| SyncError::Feed(format!("Encounter URI {uri} has no encounter id")))?
            .to_string();

        Ok(RemoteEncounter {
            health_id,
            shr_id,
            bundle: bundle.filter(|b| !b.is_null()),
        })
    }
}

#[async_trait]
impl EventWorker for EncounterPullWorker {
    fn name(&self) -> &'static str {
        "encounter_pull"
    }

    async fn process(&self, entry: &FeedEntry) -> Result<WorkOutcome> {
        let remote = Self::locate(entry)?;

        if self
            .mappings
            .find_by_external_id(&remote.shr_id, MappingType::Encounter)
            .await?
            .is_some()
        {
            return Ok(WorkOutcome::Unchanged);
        }

        let patient = self
            .mappings
            .find_by_external_id(remote.health_id.as_str(), MappingType::Patient)
            .await?
            .ok_or_else(|| SyncError::PatientNotYetSynced(remote.health_id.to_string()))?;

        if self.dry_run {
            return Ok(WorkOutcome::Skipped("dry run".to_string()));
        }

        let bundle = match remote.bundle {
            Some(bundle) => bundle,
            None => {
                self.shr
                    .fetch_encounter(&remote.health_id, &remote.shr_id)
                    .await?
            }
        };
        let local_uuid = self
            .emr
            .import_encounter(&patient.internal_id, &remote.shr_id, &bundle)
            .await?;

        let uri = self.shr.encounter_uri(&remote.health_id, &remote.shr_id);
        self.mappings
            .save(&IdMapping::new(
                &local_uuid,
                &remote.shr_id,
                MappingType::Encounter,
                uri,
            ))
            .await?;
        tracing::info!(
            health_id = %remote.health_id,
            shr_id = %remote.shr_id,
            encounter = %local_uuid,
            "Imported encounter from SHR"
        );
        Ok(WorkOutcome::Synced)
    }
}
