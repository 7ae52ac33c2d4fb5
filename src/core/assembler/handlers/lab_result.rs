use crate::config::ConceptNames;
use crate::core::assembler::bundle::derived_id;
use crate::core::assembler::handlers::{observation_resource, ObservationHandler};
use crate::core::assembler::scope::AssemblyScope;
use crate::domain::{ObservationNode, OrderType, ProducedResource, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

const DIAGNOSTIC_SERVICE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v2-0074";

/// Results of lab and radiology orders
///
/// Produces a DiagnosticReport based on the originating order, with one
/// result Observation per panel member (or the node itself for a single
/// test). Orders from an earlier encounter are referenced through that
/// encounter's SHR URI.
pub struct LabResultHandler;

#[async_trait]
impl ObservationHandler for LabResultHandler {
    fn name(&self) -> &'static str {
        "lab_result"
    }

    fn can_handle(&self, observation: &ObservationNode, _concepts: &ConceptNames) -> bool {
        observation.order.is_some()
    }

    async fn map(
        &self,
        observation: &ObservationNode,
        scope: &mut AssemblyScope<'_>,
    ) -> Result<usize> {
        let Some(order_ref) = &observation.order else {
            return Ok(0);
        };
        let ctx = scope.ctx;
        let based_on = scope.order_reference(order_ref).await?;

        let encounter = scope.encounter;
        let local_order = encounter.order(&order_ref.uuid);
        let category = match local_order.map(|o| o.order_type) {
            Some(OrderType::Radiology) => ("RAD", "Radiology"),
            _ => ("LAB", "Laboratory"),
        };
        let code = match local_order {
            Some(order) => ctx.concept(&order.concept).await?,
            None => ctx.concept(&observation.concept).await?,
        };

        let result_nodes: Vec<&ObservationNode> = if observation.is_group() {
            observation
                .active_members()
                .filter(|m| !ctx.is_ignored(&m.concept))
                .collect()
        } else {
            vec![observation]
        };

        let mut produced = Vec::new();
        let mut result_refs = Vec::new();
        for node in result_nodes {
            let mut resources = observation_resource(scope, node).await?;
            if let Some(first) = resources.first_mut() {
                first.payload["basedOn"] = json!([{ "reference": based_on }]);
                result_refs.push(json!({ "reference": first.full_url }));
            }
            produced.append(&mut resources);
        }
        if result_refs.is_empty() {
            return Ok(0);
        }

        let report = json!({
            "status": "final",
            "category": [{
                "coding": [{
                    "system": DIAGNOSTIC_SERVICE_SYSTEM,
                    "code": category.0,
                    "display": category.1
                }]
            }],
            "code": code,
            "subject": { "reference": scope.patient_reference },
            "encounter": { "reference": scope.encounter_reference },
            "issued": observation.obs_datetime.to_rfc3339(),
            "basedOn": [{ "reference": based_on }],
            "result": Value::Array(result_refs),
        });
        let report = ProducedResource::new(
            "DiagnosticReport",
            derived_id(&observation.uuid, "report"),
            report,
        )
        .with_identifier(&observation.uuid);
        produced.insert(0, report);

        let mut count = 0;
        for resource in produced {
            if scope.push(resource) {
                count += 1;
            }
        }
        Ok(count)
    }
}
