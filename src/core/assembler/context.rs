//! Lookup tables and reference resolution shared by every handler
//!
//! An [`AssemblyContext`] is resolved once per run from configuration and
//! handed to the assembler, so handlers never reach for global state.

use crate::config::{AssemblyConfig, CodingConfig, ShrConfig, ShrSyncConfig};
use crate::core::mapping::IdMappingStore;
use crate::domain::{Concept, HealthId, Location, MappingType, Provider, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One coding of a CodeableConcept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coding {
    pub system: Option<String>,
    pub code: String,
    pub display: String,
}

impl Coding {
    pub fn new(system: Option<&str>, code: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            system: system.map(str::to_string),
            code: code.into(),
            display: display.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut coding = Map::new();
        if let Some(system) = &self.system {
            coding.insert("system".to_string(), json!(system));
        }
        coding.insert("code".to_string(), json!(self.code));
        coding.insert("display".to_string(), json!(self.display));
        Value::Object(coding)
    }
}

impl From<&CodingConfig> for Coding {
    fn from(config: &CodingConfig) -> Self {
        Coding::new(config.system.as_deref(), &config.code, &config.display)
    }
}

/// `{"coding": [...], "text": ...}`
pub fn codeable_concept(codings: &[Coding], text: &str) -> Value {
    let mut concept = Map::new();
    if !codings.is_empty() {
        concept.insert(
            "coding".to_string(),
            Value::Array(codings.iter().map(Coding::to_json).collect()),
        );
    }
    concept.insert("text".to_string(), json!(text));
    Value::Object(concept)
}

/// Terminology lookups used while assembling
#[async_trait]
pub trait TerminologyLookup: Send + Sync {
    /// Registry codings of a local concept; empty when it has none
    async fn codings(&self, concept: &Concept) -> Result<Vec<Coding>>;

    /// Coding of an encounter type, defaulting to the local name
    fn encounter_type(&self, name: &str) -> Coding;
}

/// Resolves codings through Concept and ReferenceTerm identity mappings
pub struct MappedTerminology {
    mappings: IdMappingStore,
    encounter_types: BTreeMap<String, CodingConfig>,
}

impl MappedTerminology {
    pub fn new(mappings: IdMappingStore, encounter_types: BTreeMap<String, CodingConfig>) -> Self {
        Self {
            mappings,
            encounter_types,
        }
    }
}

#[async_trait]
impl TerminologyLookup for MappedTerminology {
    async fn codings(&self, concept: &Concept) -> Result<Vec<Coding>> {
        let mut codings = Vec::new();

        for term in &concept.mappings {
            let system = self
                .mappings
                .find_by_internal_id(&term.uuid, MappingType::ReferenceTerm)
                .await?
                .map_or_else(|| term.source.clone(), |m| m.uri);
            codings.push(Coding::new(Some(&system), &term.code, &concept.name));
        }

        if let Some(mapping) = self
            .mappings
            .find_by_internal_id(&concept.uuid, MappingType::Concept)
            .await?
        {
            codings.push(Coding::new(
                Some(&mapping.uri),
                mapping.external_id,
                &concept.name,
            ));
        }

        Ok(codings)
    }

    fn encounter_type(&self, name: &str) -> Coding {
        self.encounter_types
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map_or_else(|| Coding::new(None, name, name), |(_, c)| Coding::from(c))
    }
}

/// Everything a handler may consult besides the encounter itself
pub struct AssemblyContext {
    pub config: AssemblyConfig,
    pub shr: ShrConfig,
    pub mappings: IdMappingStore,
    pub terminology: Arc<dyn TerminologyLookup>,
}

impl AssemblyContext {
    pub fn new(
        config: AssemblyConfig,
        shr: ShrConfig,
        mappings: IdMappingStore,
        terminology: Arc<dyn TerminologyLookup>,
    ) -> Self {
        Self {
            config,
            shr,
            mappings,
            terminology,
        }
    }

    /// Context with mapping-backed terminology
    pub fn from_config(config: &ShrSyncConfig, mappings: IdMappingStore) -> Self {
        let terminology = Arc::new(MappedTerminology::new(
            mappings.clone(),
            config.assembly.encounter_type_mappings.clone(),
        ));
        Self::new(
            config.assembly.clone(),
            config.shr.clone(),
            mappings,
            terminology,
        )
    }

    pub fn patient_reference(&self, health_id: &HealthId) -> String {
        format!(
            "{}/patients/{}",
            self.shr.patient_registry_url.trim_end_matches('/'),
            health_id
        )
    }

    /// Registry URL of the facility that owns the visit location
    pub async fn facility_reference(&self, location: Option<&Location>) -> Result<String> {
        if let Some(location) =
            location.filter(|l| l.has_tag(&self.config.facility_location_tag))
        {
            if let Some(mapping) = self
                .mappings
                .find_by_internal_id(&location.uuid, MappingType::Facility)
                .await?
            {
                return Ok(mapping.uri);
            }
            tracing::debug!(
                location = %location.uuid,
                "Facility location has no facility mapping, using default facility"
            );
        }
        Ok(self.shr.facility_url(&self.config.default_facility_id))
    }

    /// Provider registry URL of a local provider, if known
    pub async fn provider_reference(&self, provider: &Provider) -> Result<Option<String>> {
        if let Some(mapping) = self
            .mappings
            .find_by_internal_id(&provider.uuid, MappingType::Provider)
            .await?
        {
            return Ok(Some(mapping.uri));
        }
        Ok(provider
            .identifier
            .as_deref()
            .and_then(|id| self.shr.provider_url(id)))
    }

    /// CodeableConcept JSON for a local concept
    pub async fn concept(&self, concept: &Concept) -> Result<Value> {
        let codings = self.terminology.codings(concept).await?;
        Ok(codeable_concept(&codings, &concept.name))
    }

    pub fn is_ignored(&self, concept: &Concept) -> bool {
        self.config
            .ignored_concepts
            .iter()
            .any(|name| concept.is_named(name))
    }
}
