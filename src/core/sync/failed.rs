//! Bounded store of feed events that could not be processed
//!
//! Each feed keeps at most `max_failed_events` records. When a new failure
//! would exceed that, the oldest record is dropped and logged; that event is
//! not retried again.

use crate::adapters::database::traits::{FailedEventStorage, RecordOutcome};
use crate::domain::feed::FeedEntry;
use crate::domain::ids::FeedUrl;
use crate::domain::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A feed entry whose processing failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEvent {
    pub feed_url: FeedUrl,
    pub event_id: String,
    pub title: String,
    /// Serialized [`FeedEntry`]
    pub content: String,
    pub error_message: String,
    pub failure_count: u32,
    pub failed_at: DateTime<Utc>,
}

impl FailedEvent {
    pub fn from_entry(feed_url: &FeedUrl, entry: &FeedEntry, error: &SyncError) -> Result<Self> {
        Ok(Self {
            feed_url: feed_url.clone(),
            event_id: entry.id.clone(),
            title: entry.title.clone(),
            content: serde_json::to_string(entry)?,
            error_message: error.to_string(),
            failure_count: 1,
            failed_at: Utc::now(),
        })
    }

    /// The original feed entry
    pub fn entry(&self) -> Result<FeedEntry> {
        Ok(serde_json::from_str(&self.content)?)
    }
}

/// Facade enforcing the per-feed capacity
pub struct FailedEventStore {
    storage: Arc<dyn FailedEventStorage + Send + Sync>,
    capacity: usize,
}

impl FailedEventStore {
    pub fn new(storage: Arc<dyn FailedEventStorage + Send + Sync>, capacity: usize) -> Self {
        Self {
            storage,
            capacity: capacity.max(1),
        }
    }

    /// Records a failure and returns the ids of evicted events
    pub async fn record(&self, event: FailedEvent) -> Result<Vec<String>> {
        let feed_url = event.feed_url.clone();
        let event_id = event.event_id.clone();
        match self.storage.record_failure(event, self.capacity).await? {
            RecordOutcome::Inserted { evicted } => {
                for evicted_id in &evicted {
                    tracing::warn!(
                        feed = %feed_url,
                        event_id = %evicted_id,
                        capacity = self.capacity,
                        "Failed-event store full, dropping oldest event"
                    );
                }
                Ok(evicted)
            }
            RecordOutcome::Incremented { failure_count } => {
                tracing::debug!(
                    feed = %feed_url,
                    event_id = %event_id,
                    failure_count,
                    "Failed event seen again"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Oldest first
    pub async fn list(&self, feed_url: &FeedUrl) -> Result<Vec<FailedEvent>> {
        self.storage.failed_events(feed_url).await
    }

    pub async fn remove(&self, feed_url: &FeedUrl, event_id: &str) -> Result<bool> {
        self.storage.remove_failed_event(feed_url, event_id).await
    }

    pub async fn contains(&self, feed_url: &FeedUrl, event_id: &str) -> Result<bool> {
        Ok(self
            .storage
            .failed_events(feed_url)
            .await?
            .iter()
            .any(|e| e.event_id == event_id))
    }

    pub async fn count(&self, feed_url: &FeedUrl) -> Result<usize> {
        self.storage.count_failed_events(feed_url).await
    }
}
