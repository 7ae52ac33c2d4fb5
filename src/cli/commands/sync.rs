//! Sync command implementation
//!
//! Runs the local and catchment feeds once and reports what happened.

use crate::config::load_config;
use crate::core::sync::{Direction, EntityKind, SyncCoordinator, SyncOptions, SyncSummary};
use clap::{Args, ValueEnum};
use tokio::sync::watch;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectionArg {
    /// Local EMR to registry and SHR
    Push,
    /// Catchment feeds to local EMR
    Pull,
    #[default]
    All,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Push => Direction::Push,
            DirectionArg::Pull => Direction::Pull,
            DirectionArg::All => Direction::All,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityArg {
    Patient,
    Encounter,
    #[default]
    All,
}

impl From<EntityArg> for EntityKind {
    fn from(arg: EntityArg) -> Self {
        match arg {
            EntityArg::Patient => EntityKind::Patient,
            EntityArg::Encounter => EntityKind::Encounter,
            EntityArg::All => EntityKind::All,
        }
    }
}

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Which side of the exchange to run
    #[arg(long, value_enum, default_value_t = DirectionArg::All)]
    pub direction: DirectionArg,

    /// Which feeds to run
    #[arg(long, value_enum, default_value_t = EntityArg::All)]
    pub entity: EntityArg,

    /// Pull only this catchment
    #[arg(long)]
    pub catchment: Option<String>,

    /// Retry failed events instead of reading new entries
    #[arg(long)]
    pub failed: bool,

    /// Read and assemble without writing to any remote system
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            direction: self.direction.into(),
            entity: self.entity.into(),
            catchment: self.catchment.clone(),
            failed_only: self.failed,
            dry_run: self.dry_run,
        }
    }

    /// Execute the sync command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting sync command");

        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(2);
            }
        };

        if self.dry_run {
            tracing::info!("Enabling dry-run mode from CLI");
            config.application.dry_run = true;
        }

        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Configuration validation failed");
            eprintln!("Configuration validation failed: {e}");
            return Ok(2);
        }

        if config.application.dry_run {
            println!("🔍 DRY RUN MODE - nothing will be written to the EMR, registry or SHR");
            println!();
        }

        let coordinator = match SyncCoordinator::new(config, shutdown_signal).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create sync coordinator");
                eprintln!("Failed to initialize sync: {e}");
                return Ok(4);
            }
        };

        println!("🚀 Starting sync...");
        println!();

        let summary = match coordinator.execute(&self.options()).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Sync failed");
                eprintln!("Sync failed: {e}");
                return Ok(5);
            }
        };

        print_summary(&summary);
        Ok(exit_code(&summary))
    }
}

fn print_summary(summary: &SyncSummary) {
    println!("📊 Sync Summary:");
    for feed in &summary.feeds {
        println!("  {} ({}, {:?})", feed.feed_url, feed.worker, feed.mode);
        println!(
            "    processed {}  synced {}  unchanged {}  skipped {}  failed {}",
            feed.processed, feed.synced, feed.unchanged, feed.skipped, feed.failed
        );
        if feed.recovered > 0 || feed.evicted > 0 || feed.merges > 0 {
            println!(
                "    recovered {}  evicted {}  merges {}",
                feed.recovered, feed.evicted, feed.merges
            );
        }
    }
    println!("  Total processed: {}", summary.total_processed());
    println!("  Succeeded: {}", summary.total_succeeded());
    println!("  Failed: {}", summary.total_failed());
    println!("  Duration: {:.2}s", summary.duration.as_secs_f64());
    println!();

    if summary.total_evicted() > 0 {
        println!(
            "⚠️  {} failed event(s) dropped, the failed-event store is full",
            summary.total_evicted()
        );
    }
    if let Some(error) = &summary.aborted {
        println!("❌ Sync aborted: {:?}: {}", error.error_type, error.message);
        if let Some(context) = &error.context {
            println!("    Context: {context}");
        }
    }
}

/// 130 interrupted, 3 auth abort, 4 connection abort, 5 other abort,
/// 1 entry failures, 0 otherwise
pub fn exit_code(summary: &SyncSummary) -> i32 {
    use crate::core::sync::SyncErrorType;

    if summary.interrupted() {
        println!("⚠️  Sync interrupted. Markers are saved; run again to resume.");
        tracing::info!("Sync interrupted by user signal");
        return 130;
    }
    match &summary.aborted {
        Some(error) => match error.error_type {
            SyncErrorType::Configuration => 2,
            SyncErrorType::Authentication => 3,
            SyncErrorType::Connection => 4,
            _ => 5,
        },
        None if summary.total_failed() > 0 => {
            println!("⚠️  Sync completed with failures");
            1
        }
        None => {
            println!("✅ Sync completed successfully!");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::{FeedRunReport, RunMode, SyncRunError};
    use crate::domain::{FeedUrl, SyncError};

    fn report() -> FeedRunReport {
        FeedRunReport::new(
            FeedUrl::new("http://emr.local/feed/patient").unwrap(),
            "patient_push",
            RunMode::New,
        )
    }

    #[test]
    fn test_sync_args_options() {
        let args = SyncArgs {
            direction: DirectionArg::Push,
            entity: EntityArg::Patient,
            catchment: None,
            failed: true,
            dry_run: true,
        };
        let options = args.options();
        assert_eq!(options.direction, Direction::Push);
        assert_eq!(options.entity, EntityKind::Patient);
        assert!(options.failed_only);
        assert!(options.dry_run);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&SyncSummary::new()), 0);

        let mut failed = SyncSummary::new();
        let mut r = report();
        r.failed = 1;
        failed.add_feed(r);
        assert_eq!(exit_code(&failed), 1);

        let mut auth = SyncSummary::new();
        auth.abort(SyncRunError::from_error(&SyncError::Authentication(
            "expired".into(),
        )));
        assert_eq!(exit_code(&auth), 3);

        let mut interrupted = SyncSummary::new();
        let mut r = report();
        r.interrupted = true;
        interrupted.add_feed(r);
        assert_eq!(exit_code(&interrupted), 130);
    }
}
