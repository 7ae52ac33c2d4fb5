//! Per-encounter working state handed to the handlers

use crate::core::assembler::context::AssemblyContext;
use crate::domain::{
    ClinicalEncounter, HealthId, IdMapping, MappingType, ObsValue, OrderRef, ProducedResource,
    Provider, Result, SyncError,
};
use serde_json::{json, Value};

/// Identity mapping to record once the encounter has an SHR URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMapping {
    pub internal_id: String,
    pub external_id: String,
    pub mapping_type: MappingType,
    /// `Kind/id` of the resource inside the encounter bundle
    pub resource_ref: String,
}

impl PendingMapping {
    pub fn new(
        internal_id: impl Into<String>,
        external_id: impl Into<String>,
        mapping_type: MappingType,
        resource: &ProducedResource,
    ) -> Self {
        Self {
            internal_id: internal_id.into(),
            external_id: external_id.into(),
            mapping_type,
            resource_ref: resource.typed_ref(),
        }
    }

    /// Mapping whose URI points into the submitted encounter
    pub fn resolve(&self, encounter_uri: &str) -> IdMapping {
        IdMapping::new(
            &self.internal_id,
            &self.external_id,
            self.mapping_type,
            format!("{encounter_uri}#{}", self.resource_ref),
        )
    }
}

/// Accumulates the resources and mappings of one assembly pass
pub struct AssemblyScope<'a> {
    pub ctx: &'a AssemblyContext,
    pub encounter: &'a ClinicalEncounter,
    pub health_id: &'a HealthId,
    pub patient_reference: String,
    /// `urn:uuid` of the Encounter resource
    pub encounter_reference: String,
    /// SHR URI of this encounter if it was submitted before
    pub encounter_uri: Option<String>,
    /// Registry URL of the facility the encounter happened at
    pub facility_reference: String,
    resources: Vec<ProducedResource>,
    pending: Vec<PendingMapping>,
}

impl<'a> AssemblyScope<'a> {
    pub fn new(
        ctx: &'a AssemblyContext,
        encounter: &'a ClinicalEncounter,
        health_id: &'a HealthId,
        encounter_uri: Option<String>,
        facility_reference: String,
    ) -> Self {
        Self {
            ctx,
            encounter,
            health_id,
            patient_reference: ctx.patient_reference(health_id),
            encounter_reference: format!("urn:uuid:{}", encounter.uuid),
            encounter_uri,
            facility_reference,
            resources: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Adds a resource unless one of the same kind and id is already present
    pub fn push(&mut self, resource: ProducedResource) -> bool {
        let duplicate = self
            .resources
            .iter()
            .any(|r| r.resource_kind == resource.resource_kind && r.id == resource.id);
        if duplicate {
            tracing::debug!(resource = %resource.typed_ref(), "Resource already in bundle");
            return false;
        }
        self.resources.push(resource);
        true
    }

    pub fn add_mapping(&mut self, mapping: PendingMapping) {
        if !self.pending.contains(&mapping) {
            self.pending.push(mapping);
        }
    }

    pub fn resources(&self) -> &[ProducedResource] {
        &self.resources
    }

    pub fn into_parts(self) -> (Vec<ProducedResource>, Vec<PendingMapping>) {
        (self.resources, self.pending)
    }

    /// Reference to the ServiceRequest of an order
    ///
    /// Orders placed in another encounter are reached through that
    /// encounter's SHR URI, which must already exist.
    pub async fn order_reference(&self, order: &OrderRef) -> Result<String> {
        if order.encounter_uuid == self.encounter.uuid {
            return Ok(format!("urn:uuid:{}", order.uuid));
        }

        let mapping = self
            .ctx
            .mappings
            .find_by_internal_id(&order.encounter_uuid, MappingType::Encounter)
            .await?
            .ok_or_else(|| SyncError::EncounterNotYetSynced(order.encounter_uuid.clone()))?;
        Ok(format!("{}#ServiceRequest/{}", mapping.uri, order.uuid))
    }

    /// `value[x]` field name and value for an observation value
    pub async fn value_field(&self, value: &ObsValue) -> Result<(&'static str, Value)> {
        Ok(match value {
            ObsValue::Numeric { value, units } => {
                let mut quantity = json!({ "value": value });
                if let Some(units) = units {
                    quantity["unit"] = json!(units);
                }
                ("valueQuantity", quantity)
            }
            ObsValue::Coded { concept } => {
                ("valueCodeableConcept", self.ctx.concept(concept).await?)
            }
            ObsValue::Text { value } => ("valueString", json!(value)),
            ObsValue::Datetime { value } => ("valueDateTime", json!(value.to_rfc3339())),
            ObsValue::Boolean { value } => ("valueBoolean", json!(value)),
        })
    }

    /// `{"reference": ...}` for a provider, if it can be referenced
    pub async fn practitioner(&self, provider: Option<&Provider>) -> Result<Option<Value>> {
        let Some(provider) = provider else {
            return Ok(None);
        };
        Ok(self
            .ctx
            .provider_reference(provider)
            .await?
            .map(|url| json!({ "reference": url, "display": provider.name })))
    }
}
