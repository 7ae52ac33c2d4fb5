//! Feed markers
//!
//! A marker records the last feed entry whose effects are durable. It only
//! ever moves forward, one successfully processed entry at a time.

use crate::adapters::database::traits::MarkerStorage;
use crate::domain::ids::FeedUrl;
use crate::domain::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Durable cursor of one feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedMarker {
    pub feed_url: FeedUrl,
    pub last_read_entry_id: Option<String>,
    pub last_read_at: Option<DateTime<Utc>>,
}

impl FeedMarker {
    /// Marker of a feed that has never been read
    pub fn unread(feed_url: FeedUrl) -> Self {
        Self {
            feed_url,
            last_read_entry_id: None,
            last_read_at: None,
        }
    }

    /// Moves the marker past `entry_id`
    pub fn advance(&mut self, entry_id: impl Into<String>) {
        self.last_read_entry_id = Some(entry_id.into());
        self.last_read_at = Some(Utc::now());
    }
}

/// Loads and persists feed markers
pub struct MarkerManager {
    storage: Arc<dyn MarkerStorage + Send + Sync>,
}

impl MarkerManager {
    pub fn new(storage: Arc<dyn MarkerStorage + Send + Sync>) -> Self {
        Self { storage }
    }

    /// Stored marker, or an unread one if the feed was never consumed
    pub async fn load(&self, feed_url: &FeedUrl) -> Result<FeedMarker> {
        Ok(self
            .storage
            .load_marker(feed_url)
            .await?
            .unwrap_or_else(|| FeedMarker::unread(feed_url.clone())))
    }

    /// Advances and persists the marker in one step
    pub async fn advance(&self, marker: &mut FeedMarker, entry_id: &str) -> Result<()> {
        marker.advance(entry_id);
        tracing::debug!(
            feed = %marker.feed_url,
            entry_id = entry_id,
            "Advancing feed marker"
        );
        self.storage.save_marker(marker).await
    }

    pub async fn all(&self) -> Result<Vec<FeedMarker>> {
        self.storage.all_markers().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStorage;

    fn feed() -> FeedUrl {
        FeedUrl::new("http://emr.local/feed/encounter").unwrap()
    }

    #[tokio::test]
    async fn test_load_unread_marker() {
        let manager = MarkerManager::new(Arc::new(MemoryStorage::new()));
        let marker = manager.load(&feed()).await.unwrap();
        assert_eq!(marker.last_read_entry_id, None);
        assert_eq!(marker.feed_url, feed());
    }

    #[tokio::test]
    async fn test_advance_persists() {
        let storage = Arc::new(MemoryStorage::new());
        let manager = MarkerManager::new(storage.clone());
        let mut marker = manager.load(&feed()).await.unwrap();
        manager.advance(&mut marker, "tag:3").await.unwrap();

        let reloaded = MarkerManager::new(storage).load(&feed()).await.unwrap();
        assert_eq!(reloaded.last_read_entry_id.as_deref(), Some("tag:3"));
        assert!(reloaded.last_read_at.is_some());
    }
}
