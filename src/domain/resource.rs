//! Produced resources and the encounter bundle
//!
//! Resources are kept as `serde_json::Value` payloads next to the few fields
//! the assembler needs to cross-reference them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// `urn:uuid:` reference to a resource inside the same bundle
pub fn urn(id: &str) -> String {
    format!("urn:uuid:{id}")
}

/// One resource emitted by the assembler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedResource {
    pub resource_kind: String,
    pub id: String,
    /// Stable identifiers; always holds `id` first
    pub identifiers: Vec<String>,
    pub full_url: String,
    pub payload: Value,
}

impl ProducedResource {
    /// Wraps a payload, stamping `resourceType` and `id` into it
    pub fn new(kind: impl Into<String>, id: impl Into<String>, mut payload: Value) -> Self {
        let kind = kind.into();
        let id = id.into();
        if let Value::Object(map) = &mut payload {
            map.insert("resourceType".to_string(), Value::String(kind.clone()));
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        Self {
            full_url: urn(&id),
            identifiers: vec![id.clone()],
            resource_kind: kind,
            id,
            payload,
        }
    }

    /// Adds an extra identifier (e.g. an accession number)
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        if !self.identifiers.contains(&identifier) {
            self.identifiers.push(identifier);
        }
        self
    }

    /// `Kind/id` form
    pub fn typed_ref(&self) -> String {
        format!("{}/{}", self.resource_kind, self.id)
    }
}

/// A parsed resource reference
///
/// Understands `urn:uuid:<id>`, `Kind/<id>`, absolute URLs ending in
/// `Kind/<id>` and fragment references `...#Kind/<id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: Option<String>,
    pub id: String,
}

impl ResourceRef {
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        if let Some(id) = reference.strip_prefix("urn:uuid:") {
            return (!id.is_empty()).then(|| Self {
                kind: None,
                id: id.to_string(),
            });
        }
        let tail = reference
            .rsplit_once('#')
            .map_or(reference, |(_, fragment)| fragment);
        let mut segments = tail.rsplit('/');
        let id = segments.next().filter(|s| !s.is_empty())?.to_string();
        let kind = segments
            .next()
            .filter(|s| s.chars().next().is_some_and(|c| c.is_ascii_uppercase()))
            .map(str::to_string);
        Some(Self { kind, id })
    }
}

/// Document bundle for one encounter
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// The Composition
    pub root_document: ProducedResource,
    pub resources: Vec<ProducedResource>,
}

impl Bundle {
    /// Ids of every resource, root document included
    pub fn resource_ids(&self) -> BTreeSet<String> {
        std::iter::once(&self.root_document)
            .chain(self.resources.iter())
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn resources_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a ProducedResource> {
        self.resources.iter().filter(move |r| r.resource_kind == kind)
    }

    pub fn get(&self, id: &str) -> Option<&ProducedResource> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// References listed in the composition sections
    pub fn section_references(&self) -> Vec<String> {
        self.root_document.payload["section"]
            .as_array()
            .map(|sections| {
                sections
                    .iter()
                    .flat_map(|s| s["entry"].as_array().into_iter().flatten())
                    .filter_map(|e| e["reference"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Wire form posted to the SHR
    pub fn to_fhir_json(&self) -> Value {
        let entries: Vec<Value> = std::iter::once(&self.root_document)
            .chain(self.resources.iter())
            .map(|r| json!({ "fullUrl": r.full_url, "resource": r.payload }))
            .collect();
        json!({
            "resourceType": "Bundle",
            "id": self.id,
            "type": "document",
            "timestamp": self.timestamp.to_rfc3339(),
            "entry": entries,
        })
    }
}
