//! Change feed entries
//!
//! Both the local EMR and the remote registries publish append-only feeds of
//! change notifications. An entry either points at the changed resource or
//! embeds it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of a feed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryContent {
    /// Relative or absolute URL of the changed resource
    Reference(String),
    /// The changed resource itself
    Document(Value),
}

impl EntryContent {
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            EntryContent::Reference(r) => Some(r.as_str()),
            EntryContent::Document(_) => None,
        }
    }

    pub fn as_document(&self) -> Option<&Value> {
        match self {
            EntryContent::Document(v) => Some(v),
            EntryContent::Reference(_) => None,
        }
    }

    /// Last path segment of a reference, typically the resource uuid
    pub fn referenced_id(&self) -> Option<&str> {
        let reference = self.as_reference()?;
        let path = reference.split(['?', '#']).next().unwrap_or(reference);
        path.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
    }
}

/// One entry of a change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    /// Feed-unique, ordered entry id
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub content: EntryContent,
}

impl FeedEntry {
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c.eq_ignore_ascii_case(category))
    }
}

/// One page of a feed, oldest entry first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeedPage {
    #[serde(default)]
    pub entries: Vec<FeedEntry>,
}
