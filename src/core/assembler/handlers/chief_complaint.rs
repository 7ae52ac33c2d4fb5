use crate::config::ConceptNames;
use crate::core::assembler::handlers::ObservationHandler;
use crate::core::assembler::scope::AssemblyScope;
use crate::domain::{ObservationNode, ProducedResource, Result};
use async_trait::async_trait;
use chrono::Duration;
use serde_json::json;

const CATEGORY_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/condition-category";

/// Chief complaints become problem-list Conditions with an onset period
///
/// The complaint duration is recorded in minutes, counted back from the
/// observation time.
pub struct ChiefComplaintHandler;

#[async_trait]
impl ObservationHandler for ChiefComplaintHandler {
    fn name(&self) -> &'static str {
        "chief_complaint"
    }

    fn can_handle(&self, observation: &ObservationNode, concepts: &ConceptNames) -> bool {
        observation.concept.is_named(&concepts.chief_complaint)
    }

    async fn map(
        &self,
        observation: &ObservationNode,
        scope: &mut AssemblyScope<'_>,
    ) -> Result<usize> {
        let ctx = scope.ctx;
        let concepts = &ctx.config.concepts;

        let code = match (
            observation.coded_member(&concepts.chief_complaint_coded),
            observation.text_member(&concepts.chief_complaint_non_coded),
        ) {
            (Some(concept), _) => ctx.concept(concept).await?,
            (None, Some(text)) => json!({ "text": text }),
            (None, None) => return Ok(0),
        };

        let mut payload = json!({
            "clinicalStatus": {
                "coding": [{
                    "system": "http://terminology.hl7.org/CodeSystem/condition-clinical",
                    "code": "active"
                }]
            },
            "category": [{
                "coding": [{
                    "system": CATEGORY_SYSTEM,
                    "code": "problem-list-item",
                    "display": "Complaint"
                }]
            }],
            "code": code,
            "subject": { "reference": scope.patient_reference },
            "encounter": { "reference": scope.encounter_reference },
            "recordedDate": observation.obs_datetime.to_rfc3339(),
        });

        if let Some(minutes) = observation.numeric_member(&concepts.chief_complaint_duration) {
            let end = observation.obs_datetime;
            let start = end - Duration::minutes(minutes.round() as i64);
            payload["onsetPeriod"] = json!({
                "start": start.to_rfc3339(),
                "end": end.to_rfc3339(),
            });
        }

        let condition = ProducedResource::new("Condition", &observation.uuid, payload);
        Ok(usize::from(scope.push(condition)))
    }
}
