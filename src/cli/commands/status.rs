//! Status command implementation
//!
//! Shows feed markers, failed-event counts and identity mapping counts.

use crate::adapters::database::create_storage;
use crate::config::load_config;
use crate::core::mapping::IdMappingStore;
use crate::core::sync::{FailedEventStore, MarkerManager};
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show feeds whose URL contains this text
    #[arg(long)]
    pub feed: Option<String>,

    /// List the failed events of each feed
    #[arg(long)]
    pub failed: bool,
}

impl StatusArgs {
    fn selects(&self, feed_url: &str) -> bool {
        self.feed
            .as_deref()
            .is_none_or(|filter| feed_url.contains(filter))
    }

    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking sync status");

        println!("📊 Sync Status");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        let storage = match create_storage(&config).await {
            Ok(s) => s,
            Err(e) => {
                println!("❌ Failed to connect to database");
                println!("   Error: {e}");
                return Ok(4);
            }
        };

        let markers = MarkerManager::new(storage.markers);
        let failed = FailedEventStore::new(storage.failed_events, config.sync.max_failed_events);
        let mappings = IdMappingStore::new(storage.mappings);

        let all_markers = match markers.all().await {
            Ok(m) => m,
            Err(e) => {
                println!("❌ Failed to load feed markers");
                println!("   Error: {e}");
                return Ok(5);
            }
        };
        let shown: Vec<_> = all_markers
            .iter()
            .filter(|m| self.selects(m.feed_url.as_str()))
            .collect();

        if shown.is_empty() {
            println!("No feed has been read yet.");
            println!("Run 'shrsync sync' to start synchronizing.");
        } else {
            println!(
                "{:<70} {:<30} {:<8} {:<20}",
                "Feed", "Last Entry", "Failed", "Last Read"
            );
            println!("{}", "-".repeat(130));
            for marker in shown {
                let failed_count = failed.count(&marker.feed_url).await?;
                let last_read = marker
                    .last_read_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Never".to_string());
                println!(
                    "{:<70} {:<30} {:<8} {:<20}",
                    marker.feed_url.as_str(),
                    marker.last_read_entry_id.as_deref().unwrap_or("-"),
                    failed_count,
                    last_read
                );

                if self.failed && failed_count > 0 {
                    for event in failed.list(&marker.feed_url).await? {
                        println!(
                            "    {} x{} {}: {}",
                            event.failed_at.format("%Y-%m-%d %H:%M:%S"),
                            event.failure_count,
                            event.event_id,
                            event.error_message
                        );
                    }
                }
            }
        }
        println!();

        println!("Identity mappings:");
        for (mapping_type, count) in mappings.counts().await? {
            println!("  {:<20} {}", mapping_type.to_string(), count);
        }
        println!();
        Ok(0)
    }
}
