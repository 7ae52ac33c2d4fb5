//! Identity mapping model
//!
//! An [`IdMapping`] is one row of the translation table between a locally
//! generated id and the id/URI issued by a remote registry for the same entity.

use crate::domain::ids::HealthId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity a mapping translates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    Encounter,
    Patient,
    Concept,
    ReferenceTerm,
    MedicationOrder,
    Provider,
    Facility,
    /// Diagnosis lineage, keyed by the initial diagnosis observation
    Diagnosis,
    /// Lab, radiology and procedure orders
    Order,
    Generic,
}

impl MappingType {
    /// All mapping types, in a stable order
    pub const ALL: [MappingType; 10] = [
        MappingType::Encounter,
        MappingType::Patient,
        MappingType::Concept,
        MappingType::ReferenceTerm,
        MappingType::MedicationOrder,
        MappingType::Provider,
        MappingType::Facility,
        MappingType::Diagnosis,
        MappingType::Order,
        MappingType::Generic,
    ];

    /// Stored discriminator
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingType::Encounter => "encounter",
            MappingType::Patient => "patient",
            MappingType::Concept => "concept",
            MappingType::ReferenceTerm => "reference_term",
            MappingType::MedicationOrder => "medication_order",
            MappingType::Provider => "provider",
            MappingType::Facility => "facility",
            MappingType::Diagnosis => "diagnosis",
            MappingType::Order => "order",
            MappingType::Generic => "generic",
        }
    }

    /// Physical sub-schema backing this mapping type
    pub fn schema(&self) -> MappingSchema {
        match self {
            MappingType::Encounter => MappingSchema::Encounter,
            MappingType::MedicationOrder => MappingSchema::MedicationOrder,
            MappingType::Patient => MappingSchema::Patient,
            _ => MappingSchema::Shared,
        }
    }
}

impl fmt::Display for MappingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MappingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MappingType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown mapping type: {s}"))
    }
}

/// Storage layout selected by a [`MappingType`]
///
/// Encounter mappings carry the derived health id column. Medication-order
/// mappings are kept apart because patient merges rewrite them together with
/// encounters. Everything else shares one table with a type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingSchema {
    Encounter,
    MedicationOrder,
    Patient,
    Shared,
}

impl MappingSchema {
    /// Table name used by the PostgreSQL backend
    pub fn table_name(&self) -> &'static str {
        match self {
            MappingSchema::Encounter => "encounter_id_mapping",
            MappingSchema::MedicationOrder => "medication_order_id_mapping",
            MappingSchema::Patient => "patient_id_mapping",
            MappingSchema::Shared => "shr_id_mapping",
        }
    }

    /// Whether patient merges rewrite URIs in this schema
    pub fn follows_health_id(&self) -> bool {
        matches!(self, MappingSchema::Encounter | MappingSchema::MedicationOrder)
    }
}

/// Translation between an internal id and an externally issued id/URI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMapping {
    pub internal_id: String,
    pub external_id: String,
    pub mapping_type: MappingType,
    pub uri: String,
    /// Derived from `uri` for encounter mappings, `None` otherwise
    health_id: Option<HealthId>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl IdMapping {
    /// Creates a mapping; encounter mappings get their health id from the URI
    pub fn new(
        internal_id: impl Into<String>,
        external_id: impl Into<String>,
        mapping_type: MappingType,
        uri: impl Into<String>,
    ) -> Self {
        let uri = uri.into();
        let health_id = if mapping_type == MappingType::Encounter {
            health_id_from_uri(&uri)
        } else {
            None
        };
        Self {
            internal_id: internal_id.into(),
            external_id: external_id.into(),
            mapping_type,
            uri,
            health_id,
            last_sync_time: None,
        }
    }

    /// Sets the last sync time
    pub fn with_last_sync_time(mut self, time: DateTime<Utc>) -> Self {
        self.last_sync_time = Some(time);
        self
    }

    /// Health id of the patient owning an encounter mapping
    pub fn health_id(&self) -> Option<&HealthId> {
        self.health_id.as_ref()
    }

    /// Rewrites the URI and re-derives the health id
    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = uri.into();
        if self.mapping_type == MappingType::Encounter {
            self.health_id = health_id_from_uri(&self.uri);
        }
    }

    /// Same (internal, external, type) triple
    pub fn same_identity(&self, other: &IdMapping) -> bool {
        self.internal_id == other.internal_id
            && self.external_id == other.external_id
            && self.mapping_type == other.mapping_type
    }

    /// Whether the URI names `health_id` as its patient segment
    pub fn references_health_id(&self, health_id: &HealthId) -> bool {
        self.uri.contains(&patient_segment(health_id))
    }

    /// Moves the mapping from `old` to `new` patient; returns false if untouched
    pub fn replace_health_id(
        &mut self,
        old: &HealthId,
        new: &HealthId,
        sync_time: DateTime<Utc>,
    ) -> bool {
        if !self.references_health_id(old) {
            return false;
        }
        let uri = self
            .uri
            .replace(&patient_segment(old), &patient_segment(new));
        self.set_uri(uri);
        self.last_sync_time = Some(sync_time);
        true
    }
}

fn patient_segment(health_id: &HealthId) -> String {
    format!("/patients/{}/", health_id.as_str())
}

/// Extracts the health id from `.../patients/{hid}/encounters/...`
pub fn health_id_from_uri(uri: &str) -> Option<HealthId> {
    let start = uri.find("/patients/")? + "/patients/".len();
    let rest = &uri[start..];
    let end = rest.find("/encounters")?;
    HealthId::new(&rest[..end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI: &str = "https://shr.example.org/patients/98001046534/encounters/shr-enc-1";

    fn hid(s: &str) -> HealthId {
        HealthId::new(s).unwrap()
    }

    #[test]
    fn test_encounter_mapping_derives_health_id() {
        let mapping = IdMapping::new("enc-1", "shr-enc-1", MappingType::Encounter, URI);
        assert_eq!(mapping.health_id(), Some(&hid("98001046534")));
    }

    #[test]
    fn test_other_types_have_no_health_id() {
        let mapping = IdMapping::new(
            "order-1",
            "order-1",
            MappingType::MedicationOrder,
            format!("{URI}#MedicationRequest/order-1"),
        );
        assert!(mapping.health_id().is_none());
    }

    #[test]
    fn test_health_id_from_uri_without_encounters() {
        assert!(health_id_from_uri("https://mci.example.org/patients/123").is_none());
        assert!(health_id_from_uri("urn:uuid:abc").is_none());
    }

    #[test]
    fn test_replace_health_id_rederives() {
        let mut mapping = IdMapping::new("enc-1", "shr-enc-1", MappingType::Encounter, URI);
        let now = Utc::now();
        assert!(mapping.replace_health_id(&hid("98001046534"), &hid("98001046999"), now));
        assert_eq!(
            mapping.uri,
            "https://shr.example.org/patients/98001046999/encounters/shr-enc-1"
        );
        assert_eq!(mapping.health_id(), Some(&hid("98001046999")));
        assert_eq!(mapping.last_sync_time, Some(now));
    }

    #[test]
    fn test_replace_health_id_ignores_other_patients() {
        let mut mapping = IdMapping::new("enc-1", "shr-enc-1", MappingType::Encounter, URI);
        // prefix of the stored id must not match
        assert!(!mapping.replace_health_id(&hid("9800104653"), &hid("1"), Utc::now()));
        assert_eq!(mapping.uri, URI);
    }

    #[test]
    fn test_mapping_type_round_trip_names() {
        for t in MappingType::ALL {
            assert_eq!(t.as_str().parse::<MappingType>().unwrap(), t);
        }
        assert!("encounters".parse::<MappingType>().is_err());
    }

    #[test]
    fn test_schema_routing() {
        assert_eq!(MappingType::Encounter.schema().table_name(), "encounter_id_mapping");
        assert_eq!(MappingType::Concept.schema(), MappingType::ReferenceTerm.schema());
        assert!(MappingType::MedicationOrder.schema().follows_health_id());
        assert!(!MappingType::Diagnosis.schema().follows_health_id());
    }
}
