use crate::config::ConceptNames;
use crate::core::assembler::handlers::ObservationHandler;
use crate::core::assembler::scope::AssemblyScope;
use crate::domain::{ObservationNode, ProducedResource, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

fn included_members<'n>(
    scope: &AssemblyScope<'_>,
    node: &'n ObservationNode,
) -> Vec<&'n ObservationNode> {
    node.active_members()
        .filter(|m| !scope.ctx.is_ignored(&m.concept))
        .collect()
}

/// Observation resources for a node and its members, parent first
///
/// Groups reference their members through `hasMember`.
pub async fn observation_resource(
    scope: &AssemblyScope<'_>,
    node: &ObservationNode,
) -> Result<Vec<ProducedResource>> {
    let mut ordered = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        ordered.push(current);
        let members = included_members(scope, current);
        stack.extend(members.into_iter().rev());
    }

    let mut resources = Vec::with_capacity(ordered.len());
    for current in ordered {
        let mut payload = json!({
            "status": "final",
            "code": scope.ctx.concept(&current.concept).await?,
            "subject": { "reference": scope.patient_reference },
            "encounter": { "reference": scope.encounter_reference },
            "effectiveDateTime": current.obs_datetime.to_rfc3339(),
        });

        if let Some(value) = &current.value {
            let (field, value) = scope.value_field(value).await?;
            payload[field] = value;
        }

        let members: Vec<Value> = included_members(scope, current)
            .iter()
            .map(|m| json!({ "reference": format!("urn:uuid:{}", m.uuid) }))
            .collect();
        if !members.is_empty() {
            payload["hasMember"] = Value::Array(members);
        }

        if let Some(comment) = &current.comment {
            payload["note"] = json!([{ "text": comment }]);
        }

        resources.push(ProducedResource::new("Observation", &current.uuid, payload));
    }
    Ok(resources)
}

/// Any observation with a value or members
pub struct GenericObservationHandler;

#[async_trait]
impl ObservationHandler for GenericObservationHandler {
    fn name(&self) -> &'static str {
        "observation"
    }

    fn can_handle(&self, observation: &ObservationNode, _concepts: &ConceptNames) -> bool {
        observation.value.is_some() || observation.active_members().next().is_some()
    }

    async fn map(
        &self,
        observation: &ObservationNode,
        scope: &mut AssemblyScope<'_>,
    ) -> Result<usize> {
        let mut produced = 0;
        for resource in observation_resource(scope, observation).await? {
            if scope.push(resource) {
                produced += 1;
            }
        }
        Ok(produced)
    }
}
