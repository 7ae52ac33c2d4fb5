use crate::config::ConceptNames;
use crate::core::assembler::handlers::{observation_resource, ObservationHandler};
use crate::core::assembler::scope::AssemblyScope;
use crate::domain::{ObsValue, ObservationNode, ProducedResource, Result};
use async_trait::async_trait;
use serde_json::json;

fn datetime_member(node: &ObservationNode, name: &str) -> Option<String> {
    match node.member(name)?.value.as_ref()? {
        ObsValue::Datetime { value } => Some(value.to_rfc3339()),
        _ => None,
    }
}

/// Procedure fulfillment groups
///
/// Emits a Procedure; an attached diagnostic study adds a DiagnosticReport
/// referenced from `Procedure.report` and a result Observation referenced
/// from `DiagnosticReport.result`.
pub struct ProcedureFulfillmentHandler;

#[async_trait]
impl ObservationHandler for ProcedureFulfillmentHandler {
    fn name(&self) -> &'static str {
        "procedure_fulfillment"
    }

    fn can_handle(&self, observation: &ObservationNode, concepts: &ConceptNames) -> bool {
        observation.concept.is_named(&concepts.procedure)
    }

    async fn map(
        &self,
        observation: &ObservationNode,
        scope: &mut AssemblyScope<'_>,
    ) -> Result<usize> {
        let ctx = scope.ctx;
        let concepts = &ctx.config.concepts;

        let Some(procedure_type) = observation.coded_member(&concepts.procedure_type) else {
            tracing::debug!(
                obs = %observation.uuid,
                "Procedure fulfillment without procedure type"
            );
            return Ok(0);
        };
        let code = ctx.concept(procedure_type).await?;

        let based_on = match &observation.order {
            Some(order) => Some(scope.order_reference(order).await?),
            None => None,
        };

        let mut produced = Vec::new();
        let mut procedure = json!({
            "status": "completed",
            "code": code,
            "subject": { "reference": scope.patient_reference },
            "encounter": { "reference": scope.encounter_reference },
        });

        let start = datetime_member(observation, &concepts.procedure_start);
        let end = datetime_member(observation, &concepts.procedure_end);
        if start.is_some() || end.is_some() {
            let mut period = json!({});
            if let Some(start) = start {
                period["start"] = json!(start);
            }
            if let Some(end) = end {
                period["end"] = json!(end);
            }
            procedure["performedPeriod"] = period;
        }
        if let Some(outcome) = observation.coded_member(&concepts.procedure_outcome) {
            procedure["outcome"] = ctx.concept(outcome).await?;
        }
        if let Some(notes) = observation.text_member(&concepts.procedure_notes) {
            procedure["note"] = json!([{ "text": notes }]);
        }
        if let Some(order) = &based_on {
            procedure["basedOn"] = json!([{ "reference": order }]);
        }

        if let Some(study) = observation.member(&concepts.diagnostic_study) {
            let mut report = json!({
                "status": "final",
                "code": ctx.concept(procedure_type).await?,
                "subject": { "reference": scope.patient_reference },
                "encounter": { "reference": scope.encounter_reference },
                "issued": study.obs_datetime.to_rfc3339(),
            });

            if let Some(result) = study.member(&concepts.diagnostic_result) {
                let mut results = observation_resource(scope, result).await?;
                if let Some(first) = results.first() {
                    report["result"] = json!([{ "reference": first.full_url }]);
                }
                produced.append(&mut results);
            }
            if let Some(findings) = study.text_member(&concepts.diagnostic_findings) {
                report["conclusion"] = json!(findings);
            }
            if let Some(order) = &based_on {
                report["basedOn"] = json!([{ "reference": order }]);
            }

            let report = ProducedResource::new("DiagnosticReport", &study.uuid, report);
            procedure["report"] = json!([{ "reference": report.full_url }]);
            produced.insert(0, report);
        }

        produced.insert(0, ProducedResource::new("Procedure", &observation.uuid, procedure));

        let mut count = 0;
        for resource in produced {
            if scope.push(resource) {
                count += 1;
            }
        }
        Ok(count)
    }
}
