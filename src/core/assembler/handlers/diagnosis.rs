use crate::config::ConceptNames;
use crate::core::assembler::handlers::ObservationHandler;
use crate::core::assembler::scope::{AssemblyScope, PendingMapping};
use crate::domain::{MappingType, ObservationNode, ProducedResource, Result};
use async_trait::async_trait;
use serde_json::json;

const CLINICAL_STATUS_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/condition-clinical";
const VERIFICATION_STATUS_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/condition-ver-status";
const CATEGORY_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/condition-category";
/// Extension carrying the SHR URI of the diagnosis this one supersedes
pub const PREVIOUS_DIAGNOSIS_EXTENSION: &str =
    "https://sharedhealth.org/fhir/StructureDefinition/previous-diagnosis";

/// Encounter URI a mapping URI points into
fn encounter_part(uri: &str) -> &str {
    uri.split_once('#').map_or(uri, |(encounter, _)| encounter)
}

fn verification_status(certainty: Option<&str>, status: Option<&str>) -> &'static str {
    if status.is_some_and(|s| s.eq_ignore_ascii_case("ruled out")) {
        return "refuted";
    }
    match certainty {
        Some(c) if c.eq_ignore_ascii_case("confirmed") => "confirmed",
        _ => "provisional",
    }
}

/// Visit diagnoses become Conditions tracked per diagnosis lineage
///
/// The lineage id is the uuid of the initial diagnosis. When the lineage was
/// last recorded in a different encounter, the new Condition points back at
/// it through the previous-diagnosis extension.
pub struct DiagnosisHandler;

#[async_trait]
impl ObservationHandler for DiagnosisHandler {
    fn name(&self) -> &'static str {
        "diagnosis"
    }

    fn can_handle(&self, observation: &ObservationNode, concepts: &ConceptNames) -> bool {
        observation.concept.is_named(&concepts.diagnosis)
    }

    async fn map(
        &self,
        observation: &ObservationNode,
        scope: &mut AssemblyScope<'_>,
    ) -> Result<usize> {
        let ctx = scope.ctx;
        let concepts = &ctx.config.concepts;

        let code = match (
            observation.coded_member(&concepts.coded_diagnosis),
            observation.text_member(&concepts.non_coded_diagnosis),
        ) {
            (Some(concept), _) => ctx.concept(concept).await?,
            (None, Some(text)) => json!({ "text": text }),
            (None, None) => {
                tracing::debug!(
                    obs = %observation.uuid,
                    "Diagnosis without a coded or free-text answer"
                );
                return Ok(0);
            }
        };

        let certainty = observation
            .coded_member(&concepts.diagnosis_certainty)
            .map(|c| c.name.as_str());
        let status = observation
            .coded_member(&concepts.diagnosis_status)
            .map(|c| c.name.as_str());
        let verification = verification_status(certainty, status);

        let lineage_id = observation
            .text_member(&concepts.initial_diagnosis)
            .unwrap_or(&observation.uuid)
            .to_string();

        let previous = ctx
            .mappings
            .find_by_internal_id(&lineage_id, MappingType::Diagnosis)
            .await?
            .filter(|existing| {
                let here = scope.encounter_uri.as_deref();
                here != Some(encounter_part(&existing.uri))
            });

        let mut payload = json!({
            "clinicalStatus": {
                "coding": [{ "system": CLINICAL_STATUS_SYSTEM, "code": "active" }]
            },
            "verificationStatus": {
                "coding": [{ "system": VERIFICATION_STATUS_SYSTEM, "code": verification }]
            },
            "category": [{
                "coding": [{
                    "system": CATEGORY_SYSTEM,
                    "code": "encounter-diagnosis",
                    "display": "Encounter Diagnosis"
                }]
            }],
            "code": code,
            "subject": { "reference": scope.patient_reference },
            "encounter": { "reference": scope.encounter_reference },
            "recordedDate": observation.obs_datetime.to_rfc3339(),
        });
        if let Some(previous) = &previous {
            payload["extension"] = json!([{
                "url": PREVIOUS_DIAGNOSIS_EXTENSION,
                "valueString": previous.uri,
            }]);
        }
        if let Some(comment) = &observation.comment {
            payload["note"] = json!([{ "text": comment }]);
        }

        let condition = ProducedResource::new("Condition", &observation.uuid, payload)
            .with_identifier(&lineage_id);
        scope.add_mapping(PendingMapping::new(
            &lineage_id,
            &observation.uuid,
            MappingType::Diagnosis,
            &condition,
        ));
        Ok(usize::from(scope.push(condition)))
    }
}
