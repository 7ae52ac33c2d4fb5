use crate::config::ConceptNames;
use crate::core::assembler::handlers::ObservationHandler;
use crate::core::assembler::scope::AssemblyScope;
use crate::domain::{ObsValue, ObservationNode, ProducedResource, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

/// One FamilyMemberHistory per recorded relative
///
/// Each relative group carries a relationship answer, any number of
/// condition answers and an optional onset age in years.
pub struct FamilyHistoryHandler;

#[async_trait]
impl ObservationHandler for FamilyHistoryHandler {
    fn name(&self) -> &'static str {
        "family_history"
    }

    fn can_handle(&self, observation: &ObservationNode, concepts: &ConceptNames) -> bool {
        observation.concept.is_named(&concepts.family_history)
    }

    async fn map(
        &self,
        observation: &ObservationNode,
        scope: &mut AssemblyScope<'_>,
    ) -> Result<usize> {
        let ctx = scope.ctx;
        let concepts = &ctx.config.concepts;
        let mut produced = 0;

        for relative in observation
            .active_members()
            .filter(|m| m.concept.is_named(&concepts.family_member))
        {
            let Some(relationship) = relative.coded_member(&concepts.relationship) else {
                tracing::debug!(obs = %relative.uuid, "Family member without relationship");
                continue;
            };

            let onset_age = relative.numeric_member(&concepts.onset_age);
            let mut conditions = Vec::new();
            for answer in relative
                .active_members()
                .filter(|m| m.concept.is_named(&concepts.family_condition))
            {
                let Some(ObsValue::Coded { concept }) = &answer.value else {
                    continue;
                };
                let mut condition = json!({ "code": ctx.concept(concept).await? });
                if let Some(age) = onset_age {
                    condition["onsetAge"] = json!({
                        "value": age,
                        "unit": "a",
                        "system": "http://unitsofmeasure.org",
                        "code": "a"
                    });
                }
                if let Some(note) = &answer.comment {
                    condition["note"] = json!([{ "text": note }]);
                }
                conditions.push(condition);
            }

            let mut payload = json!({
                "status": "completed",
                "patient": { "reference": scope.patient_reference },
                "date": relative.obs_datetime.to_rfc3339(),
                "relationship": ctx.concept(relationship).await?,
            });
            if !conditions.is_empty() {
                payload["condition"] = Value::Array(conditions);
            }

            let history = ProducedResource::new("FamilyMemberHistory", &relative.uuid, payload);
            if scope.push(history) {
                produced += 1;
            }
        }

        Ok(produced)
    }
}
