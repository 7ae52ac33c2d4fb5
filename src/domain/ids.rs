//! Domain identifier types with validation
//!
//! Newtype wrappers for the identifiers that cross system boundaries.
//! Local entity ids (encounter, observation, order uuids) stay plain strings;
//! the wrappers below are the ones that get mixed up when they are not typed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Health id newtype wrapper
///
/// The patient identifier issued by the patient registry. It appears as a path
/// segment in SHR URIs, so it may not contain `/`.
///
/// # Examples
///
/// ```
/// use shrsync::domain::ids::HealthId;
/// use std::str::FromStr;
///
/// let hid = HealthId::from_str("98001046534").unwrap();
/// assert_eq!(hid.as_str(), "98001046534");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HealthId(String);

impl HealthId {
    /// Creates a new HealthId from a string
    ///
    /// # Returns
    ///
    /// Returns `Ok(HealthId)` if the id is valid, `Err` otherwise
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err("Health ID cannot be empty".to_string());
        }
        if trimmed.contains('/') || trimmed.contains('#') {
            return Err(format!("Health ID must be a single path segment, got: {id}"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the health id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for HealthId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HealthId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for HealthId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Feed URL newtype wrapper
///
/// Identifies one change feed. Markers and failed events are keyed by it.
///
/// # Examples
///
/// ```
/// use shrsync::domain::ids::FeedUrl;
///
/// let feed = FeedUrl::new("https://shr.example.org/catchments/3026/encounters").unwrap();
/// assert!(feed.as_str().ends_with("/encounters"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedUrl(String);

impl FeedUrl {
    /// Creates a new FeedUrl, checking that it parses as an absolute http(s) URL
    pub fn new(feed_url: impl Into<String>) -> Result<Self, String> {
        let feed_url = feed_url.into();
        let parsed = url::Url::parse(&feed_url)
            .map_err(|e| format!("Invalid feed URL '{feed_url}': {e}"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(format!("Feed URL must use http or https, got: {feed_url}"));
        }
        Ok(Self(feed_url.trim_end_matches('/').to_string()))
    }

    /// Returns the feed URL as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for FeedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FeedUrl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for FeedUrl {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Catchment code newtype wrapper
///
/// Catchments are numeric division codes (e.g. `3026`, `302618`) that scope
/// the remote feed subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Catchment(String);

impl Catchment {
    /// Creates a new Catchment, accepting only ASCII digits
    pub fn new(code: impl Into<String>) -> Result<Self, String> {
        let code = code.into();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("Catchment must be a numeric code, got: '{code}'"));
        }
        Ok(Self(code))
    }

    /// Returns the catchment code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Catchment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Catchment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
