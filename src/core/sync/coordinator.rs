//! Sync coordinator - runs the configured feeds in dependency order
//!
//! Patients go before encounters in both directions, so an encounter rarely
//! meets a patient that has not been mapped yet. Feeds run one after another;
//! an error that aborts a feed stops the whole invocation.

use crate::adapters::database::{create_storage, Storage};
use crate::adapters::emr::{HttpEmrClient, LocalEmr};
use crate::adapters::feed::{FeedAuth, FeedSource, HttpFeedClient};
use crate::adapters::identity::HttpIdentitySession;
use crate::adapters::shr::{HttpShrClient, PatientRegistry, SharedHealthRecord};
use crate::config::ShrSyncConfig;
use crate::core::assembler::{AssemblyContext, EncounterAssembler};
use crate::core::mapping::IdMappingStore;
use crate::core::sync::failed::FailedEventStore;
use crate::core::sync::marker::MarkerManager;
use crate::core::sync::processor::{FeedProcessor, ProcessorOptions, ProcessorStores};
use crate::core::sync::summary::{SyncRunError, SyncSummary};
use crate::core::sync::workers::{
    EncounterPullWorker, EncounterPushWorker, EventWorker, PatientPullWorker, PatientPushWorker,
};
use crate::domain::ids::FeedUrl;
use crate::domain::{Result, SyncError};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Which side of the exchange to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Local feeds to the registry and the SHR
    Push,
    /// Catchment feeds to the local EMR
    Pull,
    #[default]
    All,
}

impl Direction {
    fn includes_push(self) -> bool {
        matches!(self, Self::Push | Self::All)
    }

    fn includes_pull(self) -> bool {
        matches!(self, Self::Pull | Self::All)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityKind {
    Patient,
    Encounter,
    #[default]
    All,
}

impl EntityKind {
    fn includes_patients(self) -> bool {
        matches!(self, Self::Patient | Self::All)
    }

    fn includes_encounters(self) -> bool {
        matches!(self, Self::Encounter | Self::All)
    }
}

/// Selection for one `sync` invocation
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub direction: Direction,
    pub entity: EntityKind,
    /// Restrict pulls to one configured catchment
    pub catchment: Option<String>,
    /// Retry the failed-event stores instead of reading new entries
    pub failed_only: bool,
    pub dry_run: bool,
}

/// Remote systems the workers talk to
#[derive(Clone)]
pub struct SyncServices {
    /// Local EMR feeds
    pub local_feeds: Arc<dyn FeedSource>,
    /// Catchment feeds of the SHR and the patient registry
    pub catchment_feeds: Arc<dyn FeedSource>,
    pub emr: Arc<dyn LocalEmr>,
    pub shr: Arc<dyn SharedHealthRecord>,
    pub registry: Arc<dyn PatientRegistry>,
}

impl SyncServices {
    /// HTTP clients for every remote in the configuration
    pub fn from_config(config: &ShrSyncConfig) -> Result<Self> {
        let session = Arc::new(HttpIdentitySession::new(
            config.identity.clone(),
            config.shr.timeout_seconds,
            config.shr.tls_verify,
        )?);
        let shr = Arc::new(HttpShrClient::new(&config.shr, session.clone())?);

        let local_feeds = HttpFeedClient::new(
            FeedAuth::Basic {
                username: config.emr.username.clone(),
                password: config.emr.password.clone(),
            },
            config.emr.timeout_seconds,
            config.emr.tls_verify,
            config.emr.retry.clone(),
        )?;
        let catchment_feeds = HttpFeedClient::new(
            FeedAuth::Session(session),
            config.shr.timeout_seconds,
            config.shr.tls_verify,
            config.shr.retry.clone(),
        )?;

        Ok(Self {
            local_feeds: Arc::new(local_feeds),
            catchment_feeds: Arc::new(catchment_feeds),
            emr: Arc::new(HttpEmrClient::new(&config.emr)?),
            shr: shr.clone(),
            registry: shr,
        })
    }
}

struct PlannedFeed {
    feed_url: FeedUrl,
    source: Arc<dyn FeedSource>,
    worker: Arc<dyn EventWorker>,
}

/// Sync coordinator
pub struct SyncCoordinator {
    config: ShrSyncConfig,
    services: SyncServices,
    stores: ProcessorStores,
    assembler: Arc<EncounterAssembler>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl SyncCoordinator {
    /// Connects the storage backend and builds the HTTP clients
    pub async fn new(config: ShrSyncConfig, shutdown: watch::Receiver<bool>) -> Result<Self> {
        let storage = create_storage(&config).await?;
        let services = SyncServices::from_config(&config)?;
        Ok(Self::from_parts(config, services, storage).with_shutdown(shutdown))
    }

    /// Coordinator over already-built services and storage
    pub fn from_parts(config: ShrSyncConfig, services: SyncServices, storage: Storage) -> Self {
        let mappings = IdMappingStore::new(storage.mappings);
        let stores = ProcessorStores {
            markers: Arc::new(MarkerManager::new(storage.markers)),
            failed: Arc::new(FailedEventStore::new(
                storage.failed_events,
                config.sync.max_failed_events,
            )),
            mappings: mappings.clone(),
        };
        let context = Arc::new(AssemblyContext::from_config(&config, mappings));
        Self {
            config,
            services,
            stores,
            assembler: Arc::new(EncounterAssembler::new(context)),
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn stores(&self) -> &ProcessorStores {
        &self.stores
    }

    /// Runs the selected feeds
    ///
    /// Entry failures are counted in the summary. Errors that stop a feed
    /// are recorded as [`SyncSummary::aborted`]; only setup errors are
    /// returned as `Err`.
    pub async fn execute(&self, options: &SyncOptions) -> Result<SyncSummary> {
        let start = Instant::now();
        let mut summary = SyncSummary::new();

        if let Err(e) = self.config.validate() {
            summary.abort(SyncRunError::from_error(&SyncError::Configuration(e)));
            return Ok(summary.with_duration(start.elapsed()));
        }

        let plan = self.plan(options)?;
        let dry_run = self.dry_run(options);
        tracing::info!(
            feeds = plan.len(),
            direction = ?options.direction,
            entity = ?options.entity,
            failed_only = options.failed_only,
            dry_run,
            "Starting sync"
        );

        for planned in plan {
            let processor = self.processor(planned, dry_run);
            let result = if options.failed_only {
                processor.process_failed().await
            } else {
                processor.process_new().await
            };

            match result {
                Ok(report) => {
                    let interrupted = report.interrupted;
                    summary.add_feed(report);
                    if interrupted {
                        tracing::warn!("Sync interrupted, remaining feeds skipped");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(feed = %processor.feed_url(), error = %e, "Feed run aborted");
                    summary.abort(
                        SyncRunError::from_error(&e)
                            .with_context(format!("feed={}", processor.feed_url())),
                    );
                    break;
                }
            }
        }

        let summary = summary.with_duration(start.elapsed());
        summary.log_summary();
        Ok(summary)
    }

    fn dry_run(&self, options: &SyncOptions) -> bool {
        options.dry_run || self.config.application.dry_run
    }

    fn processor(&self, planned: PlannedFeed, dry_run: bool) -> FeedProcessor {
        let processor = FeedProcessor::new(
            planned.feed_url,
            planned.source,
            planned.worker,
            self.stores.clone(),
            ProcessorOptions {
                page_size: self.config.sync.page_size,
                max_pages: self.config.sync.max_pages_per_run,
                dry_run,
            },
        );
        match &self.shutdown {
            Some(rx) => processor.with_shutdown(rx.clone()),
            None => processor,
        }
    }

    /// Feeds to run, patients before encounters
    fn plan(&self, options: &SyncOptions) -> Result<Vec<PlannedFeed>> {
        let dry_run = self.dry_run(options);
        let services = &self.services;
        let mappings = &self.stores.mappings;
        let mut plan = Vec::new();

        if options.direction.includes_push() {
            if options.entity.includes_patients() {
                plan.push(PlannedFeed {
                    feed_url: local_feed(&self.config.sync.local_patient_feed_url)?,
                    source: services.local_feeds.clone(),
                    worker: Arc::new(PatientPushWorker::new(
                        services.emr.clone(),
                        services.registry.clone(),
                        mappings.clone(),
                        dry_run,
                    )),
                });
            }
            if options.entity.includes_encounters() {
                plan.push(PlannedFeed {
                    feed_url: local_feed(&self.config.sync.local_encounter_feed_url)?,
                    source: services.local_feeds.clone(),
                    worker: Arc::new(EncounterPushWorker::new(
                        services.emr.clone(),
                        services.shr.clone(),
                        self.assembler.clone(),
                        mappings.clone(),
                        dry_run,
                    )),
                });
            }
        }

        if options.direction.includes_pull() {
            let catchments = self
                .config
                .catchment_feeds()
                .map_err(SyncError::Configuration)?;
            if let Some(wanted) = &options.catchment {
                if !catchments.iter().any(|(c, _, _)| c.as_str() == wanted) {
                    return Err(SyncError::Configuration(format!(
                        "Catchment {wanted} is not configured"
                    )));
                }
            }

            let selected = catchments
                .into_iter()
                .filter(|(c, _, _)| options.catchment.as_deref().is_none_or(|w| c.as_str() == w));
            for (_, patients, encounters) in selected {
                if options.entity.includes_patients() {
                    plan.push(PlannedFeed {
                        feed_url: patients,
                        source: services.catchment_feeds.clone(),
                        worker: Arc::new(PatientPullWorker::new(
                            services.registry.clone(),
                            services.emr.clone(),
                            mappings.clone(),
                            dry_run,
                        )),
                    });
                }
                if options.entity.includes_encounters() {
                    plan.push(PlannedFeed {
                        feed_url: encounters,
                        source: services.catchment_feeds.clone(),
                        worker: Arc::new(EncounterPullWorker::new(
                            services.shr.clone(),
                            services.emr.clone(),
                            mappings.clone(),
                            dry_run,
                        )),
                    });
                }
            }
        }

        Ok(plan)
    }
}

fn local_feed(url: &str) -> Result<FeedUrl> {
    FeedUrl::new(url).map_err(SyncError::Configuration)
}
