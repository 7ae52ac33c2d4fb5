//! Feed processor
//!
//! Drives one [`EventWorker`] over one feed. Entries are processed strictly
//! in feed order, one at a time:
//!
//! 1. **Load marker**: resume after the last durable entry
//! 2. **Fetch page**: entries after an in-memory cursor, oldest first
//! 3. **Apply**: merge notices first, then the worker
//! 4. **Checkpoint**: the marker follows each success until the first failure
//!    of the run; after that only the cursor moves on
//! 5. **Record failures**: in the bounded failed-event store
//!
//! A run ends on an empty page, after `max_pages` pages, or when shutdown is
//! requested. Shutdown is observed between entries only. A dry run reads the
//! marker and the failed-event store but writes neither.

use crate::adapters::feed::FeedSource;
use crate::core::mapping::IdMappingStore;
use crate::core::sync::failed::{FailedEvent, FailedEventStore};
use crate::core::sync::marker::MarkerManager;
use crate::core::sync::summary::{FeedRunReport, RunMode};
use crate::core::sync::workers::{EventWorker, WorkOutcome};
use crate::domain::ids::FeedUrl;
use crate::domain::{FeedEntry, Result, SyncError};
use crate::{log_event_failure, log_sync_complete, log_sync_start};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Paging limits of a run
#[derive(Debug, Clone, Copy)]
pub struct ProcessorOptions {
    pub page_size: usize,
    pub max_pages: usize,
    pub dry_run: bool,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            page_size: 25,
            max_pages: 10,
            dry_run: false,
        }
    }
}

/// Persistence a processor works against
#[derive(Clone)]
pub struct ProcessorStores {
    pub markers: Arc<MarkerManager>,
    pub failed: Arc<FailedEventStore>,
    pub mappings: IdMappingStore,
}

/// Processes one feed with one worker
pub struct FeedProcessor {
    feed_url: FeedUrl,
    source: Arc<dyn FeedSource>,
    worker: Arc<dyn EventWorker>,
    stores: ProcessorStores,
    options: ProcessorOptions,
    shutdown: Option<watch::Receiver<bool>>,
}

impl FeedProcessor {
    pub fn new(
        feed_url: FeedUrl,
        source: Arc<dyn FeedSource>,
        worker: Arc<dyn EventWorker>,
        stores: ProcessorStores,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            feed_url,
            source,
            worker,
            stores,
            options,
            shutdown: None,
        }
    }

    /// Stops the run between entries once the flag turns true
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn feed_url(&self) -> &FeedUrl {
        &self.feed_url
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Processes the entries after the marker
    ///
    /// # Errors
    ///
    /// Returns the error of an entry that [`SyncError::aborts_run`], as well as
    /// feed and storage errors. The marker then stays at the last entry
    /// persisted before the error.
    pub async fn process_new(&self) -> Result<FeedRunReport> {
        let start = Instant::now();
        let mut report = FeedRunReport::new(self.feed_url.clone(), self.worker.name(), RunMode::New);

        let mut marker = self.stores.markers.load(&self.feed_url).await?;
        log_sync_start!(self.feed_url, marker.last_read_entry_id);

        let mut cursor = marker.last_read_entry_id.clone();
        let mut marker_held = false;

        'pages: for _ in 0..self.options.max_pages {
            let page = self
                .source
                .fetch_page(&self.feed_url, cursor.as_deref(), self.options.page_size)
                .await?;
            if page.entries.is_empty() {
                break;
            }
            report.pages += 1;

            for entry in &page.entries {
                if self.shutdown_requested() {
                    tracing::info!(feed = %self.feed_url, "Shutdown requested, stopping feed run");
                    report.interrupted = true;
                    break 'pages;
                }
                cursor = Some(entry.id.clone());
                report.processed += 1;

                match self.apply(entry, &mut report).await {
                    Ok(()) if self.options.dry_run => {}
                    Ok(()) => {
                        if self.stores.failed.remove(&self.feed_url, &entry.id).await? {
                            report.recovered += 1;
                        }
                        if !marker_held {
                            self.stores.markers.advance(&mut marker, &entry.id).await?;
                        }
                    }
                    Err(e) if e.aborts_run() => {
                        tracing::error!(
                            feed = %self.feed_url,
                            event_id = %entry.id,
                            error = %e,
                            "Aborting feed run"
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        log_event_failure!(self.feed_url, entry.id, e);
                        if !marker_held {
                            tracing::debug!(
                                feed = %self.feed_url,
                                event_id = %entry.id,
                                "Holding marker for the rest of the run"
                            );
                        }
                        marker_held = true;
                        self.record_failure(entry, &e, &mut report).await?;
                    }
                }
            }
        }

        let report = report.with_duration(start.elapsed());
        log_sync_complete!(self.feed_url, report.processed, report.failed, report.duration);
        Ok(report)
    }

    /// Retries every record of the failed-event store, oldest first
    ///
    /// Successes leave the store; failures stay with a higher failure count.
    /// The marker is not touched.
    pub async fn process_failed(&self) -> Result<FeedRunReport> {
        let start = Instant::now();
        let mut report =
            FeedRunReport::new(self.feed_url.clone(), self.worker.name(), RunMode::Failed);
        let events = self.stores.failed.list(&self.feed_url).await?;
        tracing::info!(feed = %self.feed_url, count = events.len(), "Retrying failed events");

        for event in events {
            if self.shutdown_requested() {
                report.interrupted = true;
                break;
            }
            let entry = match event.entry() {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!(
                        feed = %self.feed_url,
                        event_id = %event.event_id,
                        error = %e,
                        "Stored failed event is unreadable"
                    );
                    report.failed += 1;
                    continue;
                }
            };
            report.processed += 1;

            match self.apply(&entry, &mut report).await {
                Ok(()) if self.options.dry_run => {}
                Ok(()) => {
                    self.stores.failed.remove(&self.feed_url, &entry.id).await?;
                    report.recovered += 1;
                }
                Err(e) if e.aborts_run() => return Err(e),
                Err(e) => {
                    log_event_failure!(self.feed_url, entry.id, e);
                    self.record_failure(&entry, &e, &mut report).await?;
                }
            }
        }

        let report = report.with_duration(start.elapsed());
        log_sync_complete!(self.feed_url, report.processed, report.failed, report.duration);
        Ok(report)
    }

    async fn apply(&self, entry: &FeedEntry, report: &mut FeedRunReport) -> Result<()> {
        if let Some((retired, surviving)) = self.worker.merge_notice(entry).await? {
            self.stores
                .mappings
                .replace_health_id(&retired, &surviving)
                .await
                .map_err(|e| match e {
                    SyncError::IdentityIntegrity(_) => e,
                    other => SyncError::IdentityIntegrity(format!(
                        "Merge of {retired} into {surviving} failed: {other}"
                    )),
                })?;
            report.merges += 1;
        }

        match self.worker.process(entry).await? {
            WorkOutcome::Synced => report.synced += 1,
            WorkOutcome::Unchanged => {
                tracing::debug!(feed = %self.feed_url, event_id = %entry.id, "Already applied");
                report.unchanged += 1;
            }
            WorkOutcome::Skipped(reason) => {
                tracing::debug!(
                    feed = %self.feed_url,
                    event_id = %entry.id,
                    reason = %reason,
                    "Event skipped"
                );
                report.skipped += 1;
            }
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        entry: &FeedEntry,
        error: &SyncError,
        report: &mut FeedRunReport,
    ) -> Result<()> {
        report.failed += 1;
        if self.options.dry_run {
            return Ok(());
        }
        let event = FailedEvent::from_entry(&self.feed_url, entry, error)?;
        let evicted = self.stores.failed.record(event).await?;
        report.evicted += evicted.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStorage;
    use crate::domain::{EntryContent, FeedPage, HealthId, IdMapping, MappingType};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves a fixed list of entries, honouring `after` and `limit`
    struct StaticFeed {
        entries: Vec<FeedEntry>,
    }

    #[async_trait]
    impl FeedSource for StaticFeed {
        async fn fetch_page(
            &self,
            _feed: &FeedUrl,
            after: Option<&str>,
            limit: usize,
        ) -> Result<FeedPage> {
            let start = match after {
                Some(id) => self
                    .entries
                    .iter()
                    .position(|e| e.id == id)
                    .map_or(0, |i| i + 1),
                None => 0,
            };
            Ok(FeedPage {
                entries: self.entries.iter().skip(start).take(limit).cloned().collect(),
            })
        }
    }

    /// Fails entries from a script; each scripted failure is used once
    #[derive(Default)]
    struct ScriptedWorker {
        failures: Mutex<HashMap<String, Vec<SyncError>>>,
        seen: Mutex<Vec<String>>,
        merge: Option<(HealthId, HealthId)>,
    }

    impl ScriptedWorker {
        fn failing(id: &str, errors: Vec<SyncError>) -> Self {
            let worker = Self::default();
            if let Ok(mut failures) = worker.failures.lock() {
                failures.insert(id.to_string(), errors);
            }
            worker
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventWorker for ScriptedWorker {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn process(&self, entry: &FeedEntry) -> Result<WorkOutcome> {
            self.seen.lock().unwrap().push(entry.id.clone());
            let next = self
                .failures
                .lock()
                .unwrap()
                .get_mut(&entry.id)
                .and_then(|errors| (!errors.is_empty()).then(|| errors.remove(0)));
            match next {
                Some(error) => Err(error),
                None => Ok(WorkOutcome::Synced),
            }
        }

        async fn merge_notice(&self, entry: &FeedEntry) -> Result<Option<(HealthId, HealthId)>> {
            if entry.has_category("unreadable") {
                return Err(SyncError::Connection("registry unavailable".to_string()));
            }
            Ok(entry
                .has_category("merge")
                .then(|| self.merge.clone())
                .flatten())
        }
    }

    fn feed_url() -> FeedUrl {
        FeedUrl::new("http://emr.local/feed/encounter").unwrap()
    }

    fn entry(id: &str) -> FeedEntry {
        FeedEntry {
            id: id.to_string(),
            title: "Encounter".to_string(),
            updated: None,
            categories: vec![],
            content: EntryContent::Reference(format!("/encounter/{id}")),
        }
    }

    fn stores(storage: &Arc<MemoryStorage>, capacity: usize) -> ProcessorStores {
        ProcessorStores {
            markers: Arc::new(MarkerManager::new(storage.clone())),
            failed: Arc::new(FailedEventStore::new(storage.clone(), capacity)),
            mappings: IdMappingStore::new(storage.clone()),
        }
    }

    fn processor(
        entries: Vec<FeedEntry>,
        worker: Arc<ScriptedWorker>,
        stores: ProcessorStores,
    ) -> FeedProcessor {
        FeedProcessor::new(
            feed_url(),
            Arc::new(StaticFeed { entries }),
            worker,
            stores,
            ProcessorOptions {
                page_size: 2,
                ..ProcessorOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn test_marker_follows_successes() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::default());
        let stores = stores(&storage, 5);
        let p = processor(
            vec![entry("a"), entry("b"), entry("c")],
            worker.clone(),
            stores.clone(),
        );

        let report = p.process_new().await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.synced, 3);
        assert_eq!(report.pages, 2);

        let marker = stores.markers.load(&feed_url()).await.unwrap();
        assert_eq!(marker.last_read_entry_id.as_deref(), Some("c"));

        // Nothing new on the next run
        let report = p.process_new().await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(worker.seen().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_holds_marker_but_run_continues() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::failing(
            "b",
            vec![SyncError::PatientNotYetSynced("pat-1".into())],
        ));
        let stores = stores(&storage, 5);
        let p = processor(
            vec![entry("a"), entry("b"), entry("c")],
            worker.clone(),
            stores.clone(),
        );

        let report = p.process_new().await.unwrap();
        assert_eq!(worker.seen(), vec!["a", "b", "c"]);
        assert_eq!(report.failed, 1);
        assert_eq!(report.synced, 2);

        let marker = stores.markers.load(&feed_url()).await.unwrap();
        assert_eq!(marker.last_read_entry_id.as_deref(), Some("a"));
        assert!(stores.failed.contains(&feed_url(), "b").await.unwrap());

        // The retry succeeds and empties the store; the marker stays put
        let report = p.process_failed().await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(stores.failed.count(&feed_url()).await.unwrap(), 0);
        let marker = stores.markers.load(&feed_url()).await.unwrap();
        assert_eq!(marker.last_read_entry_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_replayed_success_clears_failed_record() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::failing(
            "b",
            vec![SyncError::EncounterNotYetSynced("enc-0".into())],
        ));
        let stores = stores(&storage, 5);
        let p = processor(vec![entry("a"), entry("b"), entry("c")], worker, stores.clone());

        p.process_new().await.unwrap();
        // Second run starts after "a" and replays "b" and "c"
        let report = p.process_new().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.recovered, 1);
        assert_eq!(stores.failed.count(&feed_url()).await.unwrap(), 0);
        let marker = stores.markers.load(&feed_url()).await.unwrap();
        assert_eq!(marker.last_read_entry_id.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_repeated_retry_failure_increments_count() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::failing(
            "b",
            vec![
                SyncError::Feed("first".into()),
                SyncError::Feed("second".into()),
            ],
        ));
        let stores = stores(&storage, 5);
        let p = processor(vec![entry("a"), entry("b")], worker, stores.clone());

        p.process_new().await.unwrap();
        let report = p.process_failed().await.unwrap();
        assert_eq!(report.failed, 1);

        let events = stores.failed.list(&feed_url()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].failure_count, 2);
    }

    #[tokio::test]
    async fn test_eviction_is_counted() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::default());
        for id in ["a", "b", "c"] {
            worker
                .failures
                .lock()
                .unwrap()
                .insert(id.to_string(), vec![SyncError::Feed("down".into())]);
        }
        let stores = stores(&storage, 2);
        let p = processor(vec![entry("a"), entry("b"), entry("c")], worker, stores.clone());

        let report = p.process_new().await.unwrap();
        assert_eq!(report.failed, 3);
        assert_eq!(report.evicted, 1);
        assert!(!stores.failed.contains(&feed_url(), "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_unauthorized_aborts_without_record() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::failing(
            "b",
            vec![SyncError::Registry(
                crate::domain::RegistryError::Unauthorized("token expired".into()),
            )],
        ));
        let stores = stores(&storage, 5);
        let p = processor(
            vec![entry("a"), entry("b"), entry("c")],
            worker.clone(),
            stores.clone(),
        );

        assert!(p.process_new().await.is_err());
        assert_eq!(worker.seen(), vec!["a", "b"]);
        assert_eq!(stores.failed.count(&feed_url()).await.unwrap(), 0);
        let marker = stores.markers.load(&feed_url()).await.unwrap();
        assert_eq!(marker.last_read_entry_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_dry_run_writes_no_marker_or_failure() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::failing(
            "b",
            vec![SyncError::Feed("down".into())],
        ));
        let stores = stores(&storage, 5);
        let p = FeedProcessor::new(
            feed_url(),
            Arc::new(StaticFeed {
                entries: vec![entry("a"), entry("b")],
            }),
            worker,
            stores.clone(),
            ProcessorOptions {
                dry_run: true,
                ..ProcessorOptions::default()
            },
        );

        let report = p.process_new().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        let marker = stores.markers.load(&feed_url()).await.unwrap();
        assert!(marker.last_read_entry_id.is_none());
        assert_eq!(stores.failed.count(&feed_url()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_between_entries() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::default());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let p = processor(vec![entry("a")], worker.clone(), stores(&storage, 5)).with_shutdown(rx);

        let report = p.process_new().await.unwrap();
        assert!(report.interrupted);
        assert!(worker.seen().is_empty());
    }

    #[tokio::test]
    async fn test_merge_rewrites_mappings_before_worker() {
        let storage = Arc::new(MemoryStorage::new());
        let retired = HealthId::new("98001046534").unwrap();
        let surviving = HealthId::new("98001046999").unwrap();
        let worker = Arc::new(ScriptedWorker {
            merge: Some((retired.clone(), surviving.clone())),
            ..ScriptedWorker::default()
        });
        let stores = stores(&storage, 5);
        stores
            .mappings
            .save(&IdMapping::new(
                "enc-1",
                "shr-1",
                MappingType::Encounter,
                "https://shr.example.org/patients/98001046534/encounters/shr-1",
            ))
            .await
            .unwrap();

        let mut notice = entry("m-1");
        notice.categories.push("merge".to_string());
        let p = processor(vec![notice], worker, stores.clone());

        let report = p.process_new().await.unwrap();
        assert_eq!(report.merges, 1);
        let moved = stores
            .mappings
            .find_by_health_id(&surviving, MappingType::Encounter)
            .await
            .unwrap();
        assert_eq!(moved.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_merge_aborts_run() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker {
            merge: Some((
                HealthId::new("98001046534").unwrap(),
                HealthId::new("98001046999").unwrap(),
            )),
            ..ScriptedWorker::default()
        });
        let stores = stores(&storage, 5);
        stores
            .mappings
            .save(&IdMapping::new(
                "enc-1",
                "shr-1",
                MappingType::Encounter,
                "https://shr.example.org/patients/98001046534/encounters/shr-1",
            ))
            .await
            .unwrap();
        storage.fail_replace_after(0);

        let mut notice = entry("m-1");
        notice.categories.push("merge".to_string());
        let p = processor(vec![notice], worker.clone(), stores.clone());

        let err = p.process_new().await.unwrap_err();
        assert!(matches!(err, SyncError::IdentityIntegrity(_)));
        assert!(worker.seen().is_empty());
        assert_eq!(stores.failed.count(&feed_url()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_merge_notice_fails_only_its_entry() {
        let storage = Arc::new(MemoryStorage::new());
        let worker = Arc::new(ScriptedWorker::default());
        let stores = stores(&storage, 5);

        let mut notice = entry("m-1");
        notice.categories.push("unreadable".to_string());
        let p = processor(vec![notice, entry("e-2")], worker.clone(), stores.clone());

        let report = p.process_new().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.merges, 0);
        assert_eq!(worker.seen(), vec!["e-2".to_string()]);
        assert_eq!(stores.failed.count(&feed_url()).await.unwrap(), 1);
    }
}
