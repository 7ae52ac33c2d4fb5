//! Clinical encounter aggregate
//!
//! Snapshot of one encounter as read from the local EMR: visit, location,
//! providers, the observation tree and the orders placed during the encounter.
//! The assembler treats it as immutable input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A concept with its reference-term mappings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub mappings: Vec<ConceptReference>,
}

impl Concept {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            mappings: Vec::new(),
        }
    }

    /// Case-insensitive name comparison
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// A reference term a concept is mapped to (source + code)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptReference {
    pub uuid: String,
    pub source: String,
    pub code: String,
}

/// Root aggregate of one clinical encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClinicalEncounter {
    pub uuid: String,
    pub patient_uuid: String,
    pub encounter_type: String,
    pub encounter_datetime: DateTime<Utc>,
    /// Last modification in the local EMR, if it was ever edited
    #[serde(default)]
    pub date_changed: Option<DateTime<Utc>>,
    pub visit: Visit,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub observations: Vec<ObservationNode>,
    #[serde(default)]
    pub orders: Vec<Order>,
}

impl ClinicalEncounter {
    /// Latest of creation and modification time
    pub fn last_changed(&self) -> DateTime<Utc> {
        self.date_changed
            .map_or(self.encounter_datetime, |changed| {
                changed.max(self.encounter_datetime)
            })
    }

    /// Finds an order placed in this encounter
    pub fn order(&self, uuid: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.uuid == uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub uuid: String,
    pub visit_type: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Location {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub uuid: String,
    pub name: String,
    /// Provider-registry id, when the provider was imported from it
    #[serde(default)]
    pub identifier: Option<String>,
}

/// Reference from an observation to the order it fulfils
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRef {
    pub uuid: String,
    /// Encounter the order was placed in
    pub encounter_uuid: String,
}

/// Value carried by a leaf observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObsValue {
    Numeric {
        value: f64,
        #[serde(default)]
        units: Option<String>,
    },
    Coded {
        concept: Concept,
    },
    Text {
        value: String,
    },
    Datetime {
        value: DateTime<Utc>,
    },
    Boolean {
        value: bool,
    },
}

impl ObsValue {
    /// Text form used when a value has to be shown in a string field
    pub fn display(&self) -> String {
        match self {
            ObsValue::Numeric { value, units } => match units {
                Some(u) => format!("{value} {u}"),
                None => value.to_string(),
            },
            ObsValue::Coded { concept } => concept.name.clone(),
            ObsValue::Text { value } => value.clone(),
            ObsValue::Datetime { value } => value.to_rfc3339(),
            ObsValue::Boolean { value } => value.to_string(),
        }
    }
}

/// A node of the observation tree
///
/// Groups carry `members`; leaves carry a `value`. What a node means is decided
/// by its concept, not by a type field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationNode {
    pub uuid: String,
    pub concept: Concept,
    #[serde(default)]
    pub value: Option<ObsValue>,
    #[serde(default)]
    pub members: Vec<ObservationNode>,
    pub obs_datetime: DateTime<Utc>,
    #[serde(default)]
    pub order: Option<OrderRef>,
    #[serde(default)]
    pub voided: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

impl ObservationNode {
    pub fn is_group(&self) -> bool {
        !self.members.is_empty()
    }

    /// First non-voided direct member with the given concept name
    pub fn member(&self, concept_name: &str) -> Option<&ObservationNode> {
        self.active_members().find(|m| m.concept.is_named(concept_name))
    }

    pub fn active_members(&self) -> impl Iterator<Item = &ObservationNode> {
        self.members.iter().filter(|m| !m.voided)
    }

    /// Coded value of the named member
    pub fn coded_member(&self, concept_name: &str) -> Option<&Concept> {
        match self.member(concept_name)?.value.as_ref()? {
            ObsValue::Coded { concept } => Some(concept),
            _ => None,
        }
    }

    /// Text value of the named member
    pub fn text_member(&self, concept_name: &str) -> Option<&str> {
        match self.member(concept_name)?.value.as_ref()? {
            ObsValue::Text { value } => Some(value.as_str()),
            _ => None,
        }
    }

    /// Numeric value of the named member
    pub fn numeric_member(&self, concept_name: &str) -> Option<f64> {
        match self.member(concept_name)?.value.as_ref()? {
            ObsValue::Numeric { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Depth-first search over the subtree, including self
    pub fn find(&self, predicate: &dyn Fn(&ObservationNode) -> bool) -> Option<&ObservationNode> {
        if predicate(self) {
            return Some(self);
        }
        self.active_members().find_map(|m| m.find(predicate))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Drug,
    Lab,
    Radiology,
    Procedure,
    Test,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    New,
    Revise,
    Discontinue,
    Renew,
}

/// Dosing details of a drug order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DrugDosing {
    pub drug_name: String,
    #[serde(default)]
    pub dose: Option<f64>,
    #[serde(default)]
    pub dose_units: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub duration_units: Option<String>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub quantity_units: Option<String>,
    #[serde(default)]
    pub as_needed: bool,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// An order placed during the encounter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub uuid: String,
    pub order_type: OrderType,
    pub action: OrderAction,
    pub concept: Concept,
    #[serde(default)]
    pub previous_order_uuid: Option<String>,
    pub date_activated: DateTime<Utc>,
    #[serde(default)]
    pub date_stopped: Option<DateTime<Utc>>,
    #[serde(default)]
    pub orderer: Option<Provider>,
    #[serde(default)]
    pub accession_number: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub dosing: Option<DrugDosing>,
    #[serde(default)]
    pub voided: bool,
}

impl Order {
    pub fn is_discontinued(&self) -> bool {
        self.action == OrderAction::Discontinue
    }
}
