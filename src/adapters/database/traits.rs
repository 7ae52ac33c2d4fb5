//! Storage traits
//!
//! Backends implement these traits to persist identity mappings, feed markers
//! and failed events.

use crate::core::sync::failed::FailedEvent;
use crate::core::sync::marker::FeedMarker;
use crate::domain::ids::{FeedUrl, HealthId};
use crate::domain::mapping::{IdMapping, MappingType};
use crate::domain::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Identity mapping persistence
///
/// Lookups return `Ok(None)` when nothing matches; `Err` is reserved for
/// storage failures.
#[async_trait]
pub trait MappingStorage: Send + Sync {
    /// Test the database connection
    async fn test_connection(&self) -> Result<()>;

    async fn find_mapping_by_internal_id(
        &self,
        internal_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>>;

    async fn find_mapping_by_external_id(
        &self,
        external_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>>;

    /// Encounter and medication-order mappings owned by a patient
    async fn find_mappings_by_health_id(
        &self,
        health_id: &HealthId,
        mapping_type: MappingType,
    ) -> Result<Vec<IdMapping>>;

    async fn insert_mapping(&self, mapping: &IdMapping) -> Result<()>;

    /// Overwrites the row keyed by `(internal_id, mapping_type)`
    async fn update_mapping(&self, mapping: &IdMapping) -> Result<()>;

    /// Moves every encounter and medication-order mapping of `old` to `new`
    ///
    /// Either all affected rows are rewritten or none are. Returns the number
    /// of rewritten rows.
    async fn replace_health_id(
        &self,
        old: &HealthId,
        new: &HealthId,
        sync_time: DateTime<Utc>,
    ) -> Result<usize>;

    /// Row counts per mapping type
    async fn count_mappings(&self) -> Result<Vec<(MappingType, usize)>>;
}

/// Feed marker persistence
#[async_trait]
pub trait MarkerStorage: Send + Sync {
    async fn load_marker(&self, feed_url: &FeedUrl) -> Result<Option<FeedMarker>>;

    /// Upserts the marker of `marker.feed_url`
    async fn save_marker(&self, marker: &FeedMarker) -> Result<()>;

    async fn all_markers(&self) -> Result<Vec<FeedMarker>>;
}

/// Result of [`FailedEventStorage::record_failure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New record; lists events dropped to stay within capacity
    Inserted { evicted: Vec<String> },
    /// The event was already recorded
    Incremented { failure_count: u32 },
}

/// Bounded failed-event persistence
#[async_trait]
pub trait FailedEventStorage: Send + Sync {
    /// Oldest first
    async fn failed_events(&self, feed_url: &FeedUrl) -> Result<Vec<FailedEvent>>;

    /// Records a failure for `(feed_url, event_id)`
    ///
    /// A known event has its count, message and time updated. A new event is
    /// appended, then the oldest records of the feed are removed until at most
    /// `capacity` remain. Both steps happen atomically.
    async fn record_failure(&self, event: FailedEvent, capacity: usize) -> Result<RecordOutcome>;

    /// Returns false if the event was not recorded
    async fn remove_failed_event(&self, feed_url: &FeedUrl, event_id: &str) -> Result<bool>;

    async fn count_failed_events(&self, feed_url: &FeedUrl) -> Result<usize>;
}
