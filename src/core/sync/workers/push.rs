use super::{already_synced, parse_health_id, referenced_uuid, EventWorker, WorkOutcome};
use crate::adapters::emr::LocalEmr;
use crate::adapters::shr::{PatientRegistry, SharedHealthRecord};
use crate::core::assembler::EncounterAssembler;
use crate::core::mapping::IdMappingStore;
use crate::domain::{FeedEntry, IdMapping, MappingType, Result, SyncError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Registers or updates local patients in the patient registry
pub struct PatientPushWorker {
    emr: Arc<dyn LocalEmr>,
    registry: Arc<dyn PatientRegistry>,
    mappings: IdMappingStore,
    dry_run: bool,
}

impl PatientPushWorker {
    pub fn new(
        emr: Arc<dyn LocalEmr>,
        registry: Arc<dyn PatientRegistry>,
        mappings: IdMappingStore,
        dry_run: bool,
    ) -> Self {
        Self {
            emr,
            registry,
            mappings,
            dry_run,
        }
    }
}

#[async_trait]
impl EventWorker for PatientPushWorker {
    fn name(&self) -> &'static str {
        "patient_push"
    }

    async fn process(&self, entry: &FeedEntry) -> Result<WorkOutcome> {
        let uuid = referenced_uuid(entry)?;
        let existing = self
            .mappings
            .find_by_internal_id(uuid, MappingType::Patient)
            .await?;
        if let Some(mapping) = &existing {
            if already_synced(entry, mapping.last_sync_time) {
                return Ok(WorkOutcome::Unchanged);
            }
        }

        let patient = self.emr.fetch_patient(uuid).await?;
        if self.dry_run {
            return Ok(WorkOutcome::Skipped("dry run".to_string()));
        }

        match existing {
            Some(mapping) => {
                let health_id = parse_health_id(&mapping.external_id)?;
                self.registry
                    .update_patient(&health_id, &patient.demographics)
                    .await?;
                self.mappings.mark_synced(&mapping).await?;
                tracing::info!(patient = %uuid, health_id = %health_id, "Updated patient in registry");
            }
            None => {
                let health_id = match &patient.demographics.health_id {
                    // Imported from the registry earlier; only the mapping is missing
                    Some(health_id) => {
                        self.registry
                            .update_patient(health_id, &patient.demographics)
                            .await?;
                        health_id.clone()
                    }
                    None => self.registry.create_patient(&patient.demographics).await?,
                };
                let mapping = IdMapping::new(
                    uuid,
                    health_id.as_str(),
                    MappingType::Patient,
                    self.registry.patient_uri(&health_id),
                );
                self.mappings.save(&mapping).await?;
                tracing::info!(patient = %uuid, health_id = %health_id, "Registered patient");
            }
        }
        Ok(WorkOutcome::Synced)
    }
}

/// Assembles local encounters and submits them to the SHR
pub struct EncounterPushWorker {
    emr: Arc<dyn LocalEmr>,
    shr: Arc<dyn SharedHealthRecord>,
    assembler: Arc<EncounterAssembler>,
    mappings: IdMappingStore,
    dry_run: bool,
}

impl EncounterPushWorker {
    pub fn new(
        emr: Arc<dyn LocalEmr>,
        shr: Arc<dyn SharedHealthRecord>,
        assembler: Arc<EncounterAssembler>,
        mappings: IdMappingStore,
        dry_run: bool,
    ) -> Self {
        Self {
            emr,
            shr,
            assembler,
            mappings,
            dry_run,
        }
    }
}

#[async_trait]
impl EventWorker for EncounterPushWorker {
    fn name(&self) -> &'static str {
        "encounter_push"
    }

    async fn process(&self, entry: &FeedEntry) -> Result<WorkOutcome> {
        let uuid = referenced_uuid(entry)?;
        let encounter = self.emr.fetch_encounter(uuid).await?;

        let patient = self
            .mappings
            .find_by_internal_id(&encounter.patient_uuid, MappingType::Patient)
            .await?
            .ok_or_else(|| SyncError::PatientNotYetSynced(encounter.patient_uuid.clone()))?;
        let health_id = parse_health_id(&patient.external_id)?;

        let existing = self
            .mappings
            .find_by_internal_id(&encounter.uuid, MappingType::Encounter)
            .await?;
        if let Some(mapping) = &existing {
            if mapping
                .last_sync_time
                .is_some_and(|synced| synced >= encounter.last_changed())
            {
                return Ok(WorkOutcome::Unchanged);
            }
        }

        let assembled = self.assembler.assemble(&encounter, &health_id).await?;
        if self.dry_run {
            return Ok(WorkOutcome::Skipped(format!(
                "dry run, {} resources assembled",
                assembled.bundle.resources.len()
            )));
        }

        let body = assembled.bundle.to_fhir_json();
        let shr_id = match &existing {
            Some(mapping) => {
                self.shr
                    .update_encounter(&health_id, &mapping.external_id, &body)
                    .await?
            }
            None => self.shr.create_encounter(&health_id, &body).await?,
        };
        let mut encounter_uri = self.shr.encounter_uri(&health_id, &shr_id);

        let mapping = IdMapping::new(&encounter.uuid, &shr_id, MappingType::Encounter, &encounter_uri)
            .with_last_sync_time(Utc::now());
        match existing {
            // Keep the stored URI, a merge may have moved it to another health id
            Some(current) if current.same_identity(&mapping) => {
                self.mappings.mark_synced(&current).await?;
                encounter_uri = current.uri;
            }
            _ => {
                self.mappings.save(&mapping).await?;
            }
        }
        for pending in &assembled.pending_mappings {
            self.mappings.save(&pending.resolve(&encounter_uri)).await?;
        }

        tracing::info!(
            encounter = %encounter.uuid,
            health_id = %health_id,
            shr_id = %shr_id,
            resources = assembled.bundle.resources.len(),
            "Submitted encounter to SHR"
        );
        Ok(WorkOutcome::Synced)
    }
}
