//! In-process storage backend
//!
//! Mutex-guarded maps implementing every storage trait. Used with
//! `database_target = "memory"` for dry runs and by the test suite. Batch
//! operations work on a copy that is swapped in only when every step
//! succeeded, so they are all-or-nothing like the PostgreSQL transactions.

use crate::adapters::database::traits::{
    FailedEventStorage, MappingStorage, MarkerStorage, RecordOutcome,
};
use crate::core::sync::failed::FailedEvent;
use crate::core::sync::marker::FeedMarker;
use crate::domain::ids::{FeedUrl, HealthId};
use crate::domain::mapping::{IdMapping, MappingType};
use crate::domain::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    /// Keyed by (type, internal id)
    mappings: BTreeMap<(MappingType, String), IdMapping>,
    markers: HashMap<FeedUrl, FeedMarker>,
    failed: HashMap<FeedUrl, VecDeque<FailedEvent>>,
    /// Fail `replace_health_id` after this many rewritten rows
    replace_fault_after: Option<usize>,
    unavailable: bool,
}

/// In-memory implementation of the storage traits
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `replace_health_id` fail after `rows` rows were rewritten
    pub fn fail_replace_after(&self, rows: usize) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.replace_fault_after = Some(rows);
        }
    }

    /// Makes every operation fail with a storage error until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }

    /// Every stored mapping, for inspection
    pub fn snapshot(&self) -> Vec<IdMapping> {
        self.inner
            .lock()
            .map(|inner| inner.mappings.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self
            .inner
            .lock()
            .map_err(|e| SyncError::Storage(format!("Memory storage lock poisoned: {e}")))?;
        if inner.unavailable {
            return Err(SyncError::Storage("Memory storage is unavailable".to_string()));
        }
        Ok(inner)
    }
}

#[async_trait]
impl MappingStorage for MemoryStorage {
    async fn test_connection(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    async fn find_mapping_by_internal_id(
        &self,
        internal_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>> {
        let inner = self.lock()?;
        Ok(inner
            .mappings
            .get(&(mapping_type, internal_id.to_string()))
            .cloned())
    }

    async fn find_mapping_by_external_id(
        &self,
        external_id: &str,
        mapping_type: MappingType,
    ) -> Result<Option<IdMapping>> {
        let inner = self.lock()?;
        Ok(inner
            .mappings
            .values()
            .find(|m| m.mapping_type == mapping_type && m.external_id == external_id)
            .cloned())
    }

    async fn find_mappings_by_health_id(
        &self,
        health_id: &HealthId,
        mapping_type: MappingType,
    ) -> Result<Vec<IdMapping>> {
        let inner = self.lock()?;
        Ok(inner
            .mappings
            .values()
            .filter(|m| m.mapping_type == mapping_type)
            .filter(|m| m.health_id() == Some(health_id) || m.references_health_id(health_id))
            .cloned()
            .collect())
    }

    async fn insert_mapping(&self, mapping: &IdMapping) -> Result<()> {
        let mut inner = self.lock()?;
        let key = (mapping.mapping_type, mapping.internal_id.clone());
        if inner.mappings.contains_key(&key) {
            return Err(SyncError::Storage(format!(
                "Duplicate {} mapping for internal id {}",
                mapping.mapping_type, mapping.internal_id
            )));
        }
        inner.mappings.insert(key, mapping.clone());
        Ok(())
    }

    async fn update_mapping(&self, mapping: &IdMapping) -> Result<()> {
        let mut inner = self.lock()?;
        match inner
            .mappings
            .get_mut(&(mapping.mapping_type, mapping.internal_id.clone()))
        {
            Some(existing) => {
                *existing = mapping.clone();
                Ok(())
            }
            None => Err(SyncError::Storage(format!(
                "No {} mapping for internal id {} to update",
                mapping.mapping_type, mapping.internal_id
            ))),
        }
    }

    async fn replace_health_id(
        &self,
        old: &HealthId,
        new: &HealthId,
        sync_time: DateTime<Utc>,
    ) -> Result<usize> {
        let mut inner = self.lock()?;
        let fault_after = inner.replace_fault_after.take();
        let mut working = inner.mappings.clone();
        let mut rewritten = 0;

        for mapping in working
            .values_mut()
            .filter(|m| m.mapping_type.schema().follows_health_id())
        {
            if fault_after.is_some_and(|limit| rewritten >= limit) {
                return Err(SyncError::IdentityIntegrity(format!(
                    "Rewrite of health id {old} to {new} interrupted after {rewritten} rows"
                )));
            }
            if mapping.replace_health_id(old, new, sync_time) {
                rewritten += 1;
            }
        }

        inner.mappings = working;
        Ok(rewritten)
    }

    async fn count_mappings(&self) -> Result<Vec<(MappingType, usize)>> {
        let inner = self.lock()?;
        Ok(MappingType::ALL
            .iter()
            .map(|t| (*t, inner.mappings.keys().filter(|(kind, _)| kind == t).count()))
            .filter(|(_, count)| *count > 0)
            .collect())
    }
}

#[async_trait]
impl MarkerStorage for MemoryStorage {
    async fn load_marker(&self, feed_url: &FeedUrl) -> Result<Option<FeedMarker>> {
        Ok(self.lock()?.markers.get(feed_url).cloned())
    }

    async fn save_marker(&self, marker: &FeedMarker) -> Result<()> {
        self.lock()?
            .markers
            .insert(marker.feed_url.clone(), marker.clone());
        Ok(())
    }

    async fn all_markers(&self) -> Result<Vec<FeedMarker>> {
        let mut markers: Vec<FeedMarker> = self.lock()?.markers.values().cloned().collect();
        markers.sort_by(|a, b| a.feed_url.as_str().cmp(b.feed_url.as_str()));
        Ok(markers)
    }
}

#[async_trait]
impl FailedEventStorage for MemoryStorage {
    async fn failed_events(&self, feed_url: &FeedUrl) -> Result<Vec<FailedEvent>> {
        Ok(self
            .lock()?
            .failed
            .get(feed_url)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn record_failure(&self, event: FailedEvent, capacity: usize) -> Result<RecordOutcome> {
        let mut inner = self.lock()?;
        let events = inner.failed.entry(event.feed_url.clone()).or_default();

        if let Some(existing) = events.iter_mut().find(|e| e.event_id == event.event_id) {
            existing.failure_count += 1;
            existing.error_message = event.error_message;
            existing.failed_at = event.failed_at;
            return Ok(RecordOutcome::Incremented {
                failure_count: existing.failure_count,
            });
        }

        events.push_back(event);
        let mut evicted = Vec::new();
        while events.len() > capacity.max(1) {
            if let Some(oldest) = events.pop_front() {
                evicted.push(oldest.event_id);
            }
        }
        Ok(RecordOutcome::Inserted { evicted })
    }

    async fn remove_failed_event(&self, feed_url: &FeedUrl, event_id: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let Some(events) = inner.failed.get_mut(feed_url) else {
            return Ok(false);
        };
        let before = events.len();
        events.retain(|e| e.event_id != event_id);
        Ok(events.len() != before)
    }

    async fn count_failed_events(&self, feed_url: &FeedUrl) -> Result<usize> {
        Ok(self.lock()?.failed.get(feed_url).map_or(0, VecDeque::len))
    }
}
