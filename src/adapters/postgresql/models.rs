//! PostgreSQL row models
//!
//! Rows are read into these structs and converted to domain types with
//! `to_domain`, which is where stored strings are validated again.

use crate::core::sync::failed::FailedEvent;
use crate::core::sync::marker::FeedMarker;
use crate::domain::ids::FeedUrl;
use crate::domain::mapping::{IdMapping, MappingType};
use crate::domain::{Result, SyncError};
use chrono::{DateTime, Utc};
use tokio_postgres::Row;

/// Row of any of the mapping tables
#[derive(Debug, Clone)]
pub struct PostgreSQLMapping {
    pub internal_id: String,
    pub external_id: String,
    pub mapping_type: MappingType,
    pub uri: String,
    pub last_sync_datetime: Option<DateTime<Utc>>,
}

impl PostgreSQLMapping {
    /// Reads a row; dedicated tables have no `mapping_type` column
    pub fn from_row(row: &Row, mapping_type: MappingType) -> Self {
        Self {
            internal_id: row.get("internal_id"),
            external_id: row.get("external_id"),
            mapping_type,
            uri: row.get("uri"),
            last_sync_datetime: row.get("last_sync_datetime"),
        }
    }

    pub fn to_domain(&self) -> IdMapping {
        let mapping = IdMapping::new(
            self.internal_id.clone(),
            self.external_id.clone(),
            self.mapping_type,
            self.uri.clone(),
        );
        match self.last_sync_datetime {
            Some(time) => mapping.with_last_sync_time(time),
            None => mapping,
        }
    }
}

/// Row of `feed_markers`
#[derive(Debug, Clone)]
pub struct PostgreSQLMarker {
    pub feed_url: String,
    pub last_read_entry_id: Option<String>,
    pub last_read_at: Option<DateTime<Utc>>,
}

impl PostgreSQLMarker {
    pub fn from_row(row: &Row) -> Self {
        Self {
            feed_url: row.get("feed_url"),
            last_read_entry_id: row.get("last_read_entry_id"),
            last_read_at: row.get("last_read_at"),
        }
    }

    pub fn to_domain(&self) -> Result<FeedMarker> {
        Ok(FeedMarker {
            feed_url: FeedUrl::new(self.feed_url.as_str()).map_err(SyncError::Storage)?,
            last_read_entry_id: self.last_read_entry_id.clone(),
            last_read_at: self.last_read_at,
        })
    }
}

/// Row of `failed_events`
#[derive(Debug, Clone)]
pub struct PostgreSQLFailedEvent {
    pub feed_url: String,
    pub event_id: String,
    pub title: String,
    pub content: String,
    pub error_message: String,
    pub failure_count: i32,
    pub failed_at: DateTime<Utc>,
}

impl PostgreSQLFailedEvent {
    pub fn from_row(row: &Row) -> Self {
        Self {
            feed_url: row.get("feed_url"),
            event_id: row.get("event_id"),
            title: row.get("title"),
            content: row.get("content"),
            error_message: row.get("error_message"),
            failure_count: row.get("failure_count"),
            failed_at: row.get("failed_at"),
        }
    }

    pub fn to_domain(&self) -> Result<FailedEvent> {
        Ok(FailedEvent {
            feed_url: FeedUrl::new(self.feed_url.as_str()).map_err(SyncError::Storage)?,
            event_id: self.event_id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
            error_message: self.error_message.clone(),
            failure_count: u32::try_from(self.failure_count).unwrap_or(0),
            failed_at: self.failed_at,
        })
    }
}
