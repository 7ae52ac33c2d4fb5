//! Composition building and in-bundle reference resolution

use crate::domain::{ClinicalEncounter, ProducedResource, ResourceRef};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Stable id derived from a local id and a role, e.g. the composition of an
/// encounter
pub fn derived_id(base: &str, role: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("urn:uuid:{base}/{role}").as_bytes()).to_string()
}

fn references_in<'a>(payload: &'a Value, field: &str) -> Vec<&'a str> {
    payload[field]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["reference"].as_str())
                .collect()
        })
        .unwrap_or_default()
}

/// References a resource makes to resources that only exist as its children
fn child_references(resource: &ProducedResource) -> Vec<&str> {
    let payload = &resource.payload;
    match resource.resource_kind.as_str() {
        "DiagnosticReport" => references_in(payload, "result"),
        "Procedure" => references_in(payload, "report"),
        "MedicationRequest" => payload["priorPrescription"]["reference"]
            .as_str()
            .into_iter()
            .collect(),
        "Observation" => {
            let mut refs = references_in(payload, "hasMember");
            if let Some(related) = payload["related"].as_array() {
                refs.extend(
                    related
                        .iter()
                        .filter_map(|r| r["target"]["reference"].as_str()),
                );
            }
            refs
        }
        _ => Vec::new(),
    }
}

/// Resources to list as composition sections
///
/// Anything that another resource in the set claims as a child is left out,
/// so every resource is reachable exactly once.
pub fn identify_top_level_resources(resources: &[ProducedResource]) -> Vec<&ProducedResource> {
    let children: BTreeSet<(&str, &str)> = resources
        .iter()
        .flat_map(child_references)
        .filter_map(|reference| find_resource_by_reference(resources, reference))
        .map(|child| (child.resource_kind.as_str(), child.id.as_str()))
        .collect();

    resources
        .iter()
        .filter(|r| !children.contains(&(r.resource_kind.as_str(), r.id.as_str())))
        .collect()
}

/// Finds the resource a reference points at
///
/// Tried in order: same kind and id, same id of any kind, full URL ending
/// with the id.
pub fn find_resource_by_reference<'a>(
    resources: &'a [ProducedResource],
    reference: &str,
) -> Option<&'a ProducedResource> {
    let target = ResourceRef::parse(reference)?;

    if let Some(kind) = &target.kind {
        if let Some(found) = resources
            .iter()
            .find(|r| &r.resource_kind == kind && r.id == target.id)
        {
            return Some(found);
        }
    }

    resources
        .iter()
        .find(|r| r.id == target.id)
        .or_else(|| resources.iter().find(|r| r.full_url.ends_with(&target.id)))
}

/// Root document of an encounter bundle
pub fn composition(
    encounter: &ClinicalEncounter,
    patient_reference: &str,
    facility_reference: &str,
    sections: &[&ProducedResource],
) -> ProducedResource {
    let id = derived_id(&encounter.uuid, "composition");
    let section: Vec<Value> = sections
        .iter()
        .map(|r| {
            json!({
                "entry": [{ "reference": r.full_url, "display": r.resource_kind }]
            })
        })
        .collect();

    let payload = json!({
        "identifier": { "value": format!("urn:uuid:{id}") },
        "status": "final",
        "type": {
            "coding": [{
                "system": "http://hl7.org/fhir/vs/doc-typecodes",
                "code": "51899-3",
                "display": "Details Document"
            }]
        },
        "subject": { "reference": patient_reference },
        "encounter": { "reference": format!("urn:uuid:{}", encounter.uuid) },
        "date": encounter.last_changed().to_rfc3339(),
        "author": [{ "reference": facility_reference }],
        "title": "Patient Clinical Encounter",
        "confidentiality": "N",
        "section": section,
    });

    ProducedResource::new("Composition", id, payload)
}
