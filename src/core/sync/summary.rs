//! Run summaries and reporting
//!
//! A [`FeedRunReport`] describes one pass over one feed; a [`SyncSummary`]
//! aggregates the passes of a `shrsync sync` invocation.

use crate::domain::ids::FeedUrl;
use crate::domain::{RegistryError, SyncError};
use std::time::Duration;

/// Which entries a pass worked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Entries after the marker
    New,
    /// Records of the failed-event store
    Failed,
}

/// Counters of one feed pass
#[derive(Debug, Clone)]
pub struct FeedRunReport {
    pub feed_url: FeedUrl,
    pub worker: &'static str,
    pub mode: RunMode,
    pub pages: usize,
    /// Entries handed to the worker
    pub processed: usize,
    pub synced: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Failed-store records removed after a later success
    pub recovered: usize,
    /// Failed-store records dropped for capacity
    pub evicted: usize,
    /// Patient merges applied to the identity mappings
    pub merges: usize,
    pub interrupted: bool,
    pub duration: Duration,
}

impl FeedRunReport {
    pub fn new(feed_url: FeedUrl, worker: &'static str, mode: RunMode) -> Self {
        Self {
            feed_url,
            worker,
            mode,
            pages: 0,
            processed: 0,
            synced: 0,
            unchanged: 0,
            skipped: 0,
            failed: 0,
            recovered: 0,
            evicted: 0,
            merges: 0,
            interrupted: false,
            duration: Duration::from_secs(0),
        }
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn succeeded(&self) -> usize {
        self.synced + self.unchanged + self.skipped
    }
}

/// Broad class of an error that stopped a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorType {
    Configuration,
    Authentication,
    Connection,
    Storage,
    IdentityIntegrity,
    Unknown,
}

impl SyncErrorType {
    pub fn classify(error: &SyncError) -> Self {
        match error {
            SyncError::Configuration(_) | SyncError::Validation(_) => Self::Configuration,
            SyncError::Authentication(_) | SyncError::Registry(RegistryError::Unauthorized(_)) => {
                Self::Authentication
            }
            SyncError::Connection(_)
            | SyncError::Registry(RegistryError::ConnectionFailed(_))
            | SyncError::Registry(RegistryError::Timeout(_)) => Self::Connection,
            SyncError::Storage(_) => Self::Storage,
            SyncError::IdentityIntegrity(_) => Self::IdentityIntegrity,
            _ => Self::Unknown,
        }
    }
}

/// Run-level error with context
#[derive(Debug, Clone)]
pub struct SyncRunError {
    pub error_type: SyncErrorType,
    pub message: String,
    /// e.g. the feed being processed
    pub context: Option<String>,
}

impl SyncRunError {
    pub fn from_error(error: &SyncError) -> Self {
        Self {
            error_type: SyncErrorType::classify(error),
            message: error.to_string(),
            context: None,
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }
}

/// Summary of a sync invocation
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub feeds: Vec<FeedRunReport>,
    /// Error that stopped the run early, if any
    pub aborted: Option<SyncRunError>,
    pub duration: Duration,
}

impl SyncSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn add_feed(&mut self, report: FeedRunReport) {
        self.feeds.push(report);
    }

    pub fn abort(&mut self, error: SyncRunError) {
        self.aborted = Some(error);
    }

    fn total(&self, count: impl Fn(&FeedRunReport) -> usize) -> usize {
        self.feeds.iter().map(count).sum()
    }

    pub fn total_processed(&self) -> usize {
        self.total(|f| f.processed)
    }

    pub fn total_succeeded(&self) -> usize {
        self.total(FeedRunReport::succeeded)
    }

    pub fn total_failed(&self) -> usize {
        self.total(|f| f.failed)
    }

    pub fn total_evicted(&self) -> usize {
        self.total(|f| f.evicted)
    }

    pub fn interrupted(&self) -> bool {
        self.feeds.iter().any(|f| f.interrupted)
    }

    /// No failed entries and no abort
    pub fn is_successful(&self) -> bool {
        self.aborted.is_none() && self.total_failed() == 0
    }

    /// Log the summary
    pub fn log_summary(&self) {
        for feed in &self.feeds {
            tracing::info!(
                feed = %feed.feed_url,
                worker = feed.worker,
                mode = ?feed.mode,
                processed = feed.processed,
                synced = feed.synced,
                unchanged = feed.unchanged,
                skipped = feed.skipped,
                failed = feed.failed,
                recovered = feed.recovered,
                evicted = feed.evicted,
                merges = feed.merges,
                "Feed summary"
            );
        }

        tracing::info!(
            feeds = self.feeds.len(),
            processed = self.total_processed(),
            succeeded = self.total_succeeded(),
            failed = self.total_failed(),
            evicted = self.total_evicted(),
            duration_secs = self.duration.as_secs(),
            "Sync completed"
        );

        if self.total_evicted() > 0 {
            tracing::warn!(
                evicted = self.total_evicted(),
                "Failed events were dropped because the failed-event store was full"
            );
        }
        if let Some(error) = &self.aborted {
            tracing::error!(
                error_type = ?error.error_type,
                message = %error.message,
                context = ?error.context,
                "Sync aborted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(failed: usize, synced: usize) -> FeedRunReport {
        let mut r = FeedRunReport::new(
            FeedUrl::new("http://emr.local/feed/encounter").unwrap(),
            "encounter_push",
            RunMode::New,
        );
        r.processed = failed + synced;
        r.failed = failed;
        r.synced = synced;
        r
    }

    #[test]
    fn test_summary_totals() {
        let mut summary = SyncSummary::new();
        summary.add_feed(report(1, 4));
        summary.add_feed(report(0, 3));

        assert_eq!(summary.total_processed(), 8);
        assert_eq!(summary.total_succeeded(), 7);
        assert_eq!(summary.total_failed(), 1);
        assert!(!summary.is_successful());
    }

    #[test]
    fn test_summary_with_duration() {
        let summary = SyncSummary::new().with_duration(Duration::from_secs(12));
        assert_eq!(summary.duration, Duration::from_secs(12));
        assert!(summary.is_successful());
    }

    #[test]
    fn test_abort_is_not_successful() {
        let mut summary = SyncSummary::new();
        summary.abort(
            SyncRunError::from_error(&SyncError::Authentication("expired".into()))
                .with_context("feed=http://emr.local/feed/patient".to_string()),
        );
        assert!(!summary.is_successful());
        assert_eq!(
            summary.aborted.unwrap().error_type,
            SyncErrorType::Authentication
        );
    }

    #[test]
    fn test_classify_errors() {
        assert_eq!(
            SyncErrorType::classify(&SyncError::Registry(RegistryError::Unauthorized(
                "401".into()
            ))),
            SyncErrorType::Authentication
        );
        assert_eq!(
            SyncErrorType::classify(&SyncError::Registry(RegistryError::Timeout("30s".into()))),
            SyncErrorType::Connection
        );
        assert_eq!(
            SyncErrorType::classify(&SyncError::IdentityIntegrity("rollback".into())),
            SyncErrorType::IdentityIntegrity
        );
    }
}
