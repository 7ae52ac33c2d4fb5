//! Feed event workers
//!
//! A worker applies one feed entry. Push workers read the local EMR feeds and
//! write to the patient registry and the SHR; pull workers read catchment
//! feeds and write to the local EMR. Every worker is idempotent: replaying an
//! entry whose effect is already recorded in the identity mappings succeeds
//! without touching the remote side.

mod pull;
mod push;

pub use pull::{EncounterPullWorker, PatientPullWorker};
pub use push::{EncounterPushWorker, PatientPushWorker};

use crate::domain::{FeedEntry, HealthId, Result, SyncError};
use async_trait::async_trait;

/// What a worker did with an entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The remote side was written
    Synced,
    /// Already applied earlier
    Unchanged,
    /// Deliberately not applied, e.g. in dry-run mode
    Skipped(String),
}

#[async_trait]
pub trait EventWorker: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, entry: &FeedEntry) -> Result<WorkOutcome>;

    /// `(retired, surviving)` health ids when the entry announces a patient
    /// merge
    async fn merge_notice(&self, _entry: &FeedEntry) -> Result<Option<(HealthId, HealthId)>> {
        Ok(None)
    }
}

/// Uuid of the resource a local feed entry points at
fn referenced_uuid(entry: &FeedEntry) -> Result<&str> {
    entry.content.referenced_id().ok_or_else(|| {
        SyncError::Feed(format!("Entry {} does not reference a resource", entry.id))
    })
}

fn parse_health_id(value: &str) -> Result<HealthId> {
    HealthId::new(value).map_err(SyncError::Validation)
}

/// Whether the entry is no newer than the last sync of its mapping
fn already_synced(entry: &FeedEntry, last_sync: Option<chrono::DateTime<chrono::Utc>>) -> bool {
    matches!((entry.updated, last_sync), (Some(updated), Some(synced)) if updated <= synced)
}
