//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the shrsync configuration file.

use crate::config::load_config;
use crate::config::schema::DatabaseTarget;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates as well; a failure here covers both
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        let feeds = match config.catchment_feeds() {
            Ok(feeds) => feeds,
            Err(e) => {
                println!("❌ Catchment feeds cannot be built");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Environment: {:?}", config.environment);
        println!("  Log Level: {}", config.application.log_level);
        println!("  Dry Run: {}", config.application.dry_run);
        println!("  SHR: {}", config.shr.base_url);
        println!("  Patient Registry: {}", config.shr.patient_registry_url);
        println!("  Facility Registry: {}", config.shr.facility_registry_url);
        println!("  Local EMR: {}", config.emr.base_url);
        println!("  Default Facility: {}", config.assembly.default_facility_id);

        match config.database_target {
            DatabaseTarget::PostgreSQL => {
                if let Some(ref pg_config) = config.postgresql {
                    use secrecy::ExposeSecret;
                    println!("  Database Target: PostgreSQL");
                    println!(
                        "  PostgreSQL Connection: {}",
                        pg_config
                            .connection_string
                            .expose_secret()
                            .as_ref()
                            .split('@')
                            .next_back()
                            .unwrap_or("***")
                    );
                    println!("  Max Connections: {}", pg_config.max_connections);
                }
            }
            DatabaseTarget::Memory => {
                println!("  Database Target: memory (nothing is kept between runs)");
            }
        }

        println!("  Local Feeds:");
        println!("    {}", config.sync.local_patient_feed_url);
        println!("    {}", config.sync.local_encounter_feed_url);
        println!("  Catchment Feeds:");
        for (catchment, patients, encounters) in &feeds {
            println!("    [{}] {}", catchment.as_str(), patients);
            println!("    [{}] {}", catchment.as_str(), encounters);
        }
        println!(
            "  Page Size: {} x {} pages",
            config.sync.page_size, config.sync.max_pages_per_run
        );
        println!("  Failed Events Kept: {}", config.sync.max_failed_events);
        println!();
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let args = ValidateArgs {};
        let code = args.execute("/nonexistent/shrsync.toml").await.unwrap();
        assert_eq!(code, 2);
    }

    #[tokio::test]
    async fn test_invalid_config_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "database_target = \"memory\"").unwrap();
        let args = ValidateArgs {};
        assert_eq!(args.execute(file.path().to_str().unwrap()).await.unwrap(), 2);
    }
}
