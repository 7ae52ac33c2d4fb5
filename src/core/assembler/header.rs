//! Encounter resource: patient, facility, class, type and participants

use crate::core::assembler::context::codeable_concept;
use crate::core::assembler::scope::AssemblyScope;
use crate::domain::{ProducedResource, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;

const ENCOUNTER_CLASS_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";

const INPATIENT_WORDS: &[&str] = &["ipd", "inpatient", "admission", "admitted", "ward"];
const EMERGENCY_WORDS: &[&str] = &["emergency", "er", "casualty"];
const HOME_WORDS: &[&str] = &["home", "domiciliary"];
const FIELD_WORDS: &[&str] = &["field", "camp", "outreach", "community"];

/// Encounter class code of a visit type
///
/// The configured table wins; otherwise synonyms pick IMP, EMER, HH or FLD,
/// and anything else is ambulatory.
pub fn visit_class(visit_type: &str, table: &BTreeMap<String, String>) -> String {
    if let Some((_, class)) = table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(visit_type))
    {
        return class.clone();
    }

    let lower = visit_type.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let mentions = |synonyms: &[&str]| words.iter().any(|w| synonyms.contains(w));

    let class = if mentions(INPATIENT_WORDS) {
        "IMP"
    } else if mentions(EMERGENCY_WORDS) {
        "EMER"
    } else if mentions(HOME_WORDS) {
        "HH"
    } else if mentions(FIELD_WORDS) {
        "FLD"
    } else {
        "AMB"
    };
    class.to_string()
}

/// Builds the Encounter resource of the bundle
pub async fn encounter_resource(
    scope: &AssemblyScope<'_>,
    facility_reference: &str,
) -> Result<ProducedResource> {
    let encounter = scope.encounter;
    let ctx = scope.ctx;

    let class = visit_class(&encounter.visit.visit_type, &ctx.config.visit_type_mappings);
    let encounter_type = ctx.terminology.encounter_type(&encounter.encounter_type);

    let mut participants = Vec::new();
    for provider in &encounter.providers {
        match scope.practitioner(Some(provider)).await? {
            Some(individual) => participants.push(json!({ "individual": individual })),
            None => tracing::debug!(
                provider = %provider.uuid,
                "Provider has no registry reference, leaving it out"
            ),
        }
    }

    let mut period = json!({ "start": encounter.visit.start.to_rfc3339() });
    if let Some(stop) = encounter.visit.stop {
        period["end"] = json!(stop.to_rfc3339());
    }

    let mut payload = json!({
        "status": "finished",
        "class": {
            "system": ENCOUNTER_CLASS_SYSTEM,
            "code": class,
        },
        "type": [codeable_concept(&[encounter_type], &encounter.encounter_type)],
        "subject": {
            "reference": scope.patient_reference,
            "display": scope.health_id.as_str(),
        },
        "period": period,
        "serviceProvider": { "reference": facility_reference },
    });
    if !participants.is_empty() {
        payload["participant"] = Value::Array(participants);
    }

    Ok(ProducedResource::new("Encounter", &encounter.uuid, payload))
}
