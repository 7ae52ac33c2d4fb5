//! Integration tests for configuration loading and validation
//!
//! Note: Tests that modify environment variables should be run with --test-threads=1
//! to avoid interference between tests.

use secrecy::ExposeSecret;
use shrsync::config::{load_config, DatabaseTarget};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

// Mutex to serialize tests that modify environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Holds the env lock even after another test panicked while holding it
fn lock_env() -> MutexGuard<'static, ()> {
    ENV_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Helper function to clean up environment variables
fn cleanup_env_vars() {
    std::env::remove_var("SHRSYNC_APPLICATION_LOG_LEVEL");
    std::env::remove_var("SHRSYNC_APPLICATION_DRY_RUN");
    std::env::remove_var("SHRSYNC_SYNC_CATCHMENTS");
    std::env::remove_var("SHRSYNC_SYNC_PAGE_SIZE");
    std::env::remove_var("SHRSYNC_DATABASE_TARGET");
    std::env::remove_var("SHRSYNC_ENVIRONMENT");
    std::env::remove_var("TEST_SHRSYNC_IDP_PASSWORD");
    std::env::remove_var("TEST_SHRSYNC_PG_URL");
}

fn write_config(toml_content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(toml_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

const MINIMAL: &str = r#"
database_target = "memory"

[shr]
base_url = "https://shr.example.org/api/v1"
patient_registry_url = "https://mci.example.org/api/v1"
facility_registry_url = "https://fr.example.org/api/1.0"

[identity]
signin_url = "https://idp.example.org/signin"
client_id = "18550"
auth_token = "token"
email = "facility@example.org"
password = "secret"

[emr]
base_url = "http://emr.local/openmrs/ws/rest/v1"
username = "superman"
password = "Admin123"

[sync]
catchments = ["3026"]
local_patient_feed_url = "http://emr.local/openmrs/ws/atomfeed/patient/recent"
local_encounter_feed_url = "http://emr.local/openmrs/ws/atomfeed/encounter/recent"

[assembly]
default_facility_id = "10019841"
"#;

#[test]
fn test_load_complete_config() {
    let _lock = lock_env();
    cleanup_env_vars();
    let toml_content = r#"
environment = "staging"
database_target = "postgresql"

[application]
log_level = "debug"
dry_run = true

[shr]
base_url = "https://shr.example.org/api/v1"
patient_registry_url = "https://mci.example.org/api/v1"
facility_registry_url = "https://fr.example.org/api/1.0"
provider_registry_url = "https://pr.example.org/api/1.0"
timeout_seconds = 45

[shr.retry]
max_retries = 5
initial_delay_ms = 250

[identity]
signin_url = "https://idp.example.org/signin"
client_id = "18550"
auth_token = "token-123"
email = "facility@example.org"
password = "secret"

[emr]
base_url = "http://emr.local/openmrs/ws/rest/v1"
username = "superman"
password = "Admin123"

[sync]
catchments = ["3026", "302618"]
max_failed_events = 10
page_size = 50
max_pages_per_run = 4
local_patient_feed_url = "http://emr.local/openmrs/ws/atomfeed/patient/recent"
local_encounter_feed_url = "http://emr.local/openmrs/ws/atomfeed/encounter/recent"

[assembly]
default_facility_id = "10019841"

[postgresql]
connection_string = "postgresql://shrsync:pw@localhost:5432/shrsync"
max_connections = 5
ssl_mode = "disable"

[logging]
local_enabled = false
local_path = "/tmp/shrsync"
local_rotation = "hourly"
"#;

    let temp_file = write_config(toml_content);
    let config = load_config(temp_file.path()).expect("Failed to load config");

    // Verify application config
    assert_eq!(config.application.log_level, "debug");
    assert!(config.application.dry_run);

    // Verify registry config
    assert_eq!(config.shr.base_url, "https://shr.example.org/api/v1");
    assert_eq!(
        config.shr.provider_registry_url.as_deref(),
        Some("https://pr.example.org/api/1.0")
    );
    assert_eq!(config.shr.timeout_seconds, 45);
    assert_eq!(config.shr.retry.max_retries, 5);
    assert_eq!(config.shr.retry.initial_delay_ms, 250);
    assert_eq!(config.identity.auth_token.expose_secret(), "token-123");

    // Verify sync config
    assert_eq!(config.sync.catchments, vec!["3026", "302618"]);
    assert_eq!(config.sync.max_failed_events, 10);
    assert_eq!(config.sync.page_size, 50);
    assert_eq!(config.sync.max_pages_per_run, 4);

    // Verify storage config
    assert_eq!(config.database_target, DatabaseTarget::PostgreSQL);
    let pg = config.postgresql.as_ref().unwrap();
    assert_eq!(pg.max_connections, 5);
    assert_eq!(pg.ssl_mode, "disable");

    // Verify logging config
    assert!(!config.logging.local_enabled);
    assert_eq!(config.logging.local_path, "/tmp/shrsync");
    assert_eq!(config.logging.local_rotation, "hourly");

    let feeds = config.catchment_feeds().unwrap();
    assert_eq!(feeds.len(), 2);
    assert_eq!(
        feeds[1].2.as_str(),
        "https://shr.example.org/api/v1/catchments/302618/encounters"
    );
}

#[test]
fn test_load_minimal_config_with_defaults() {
    let _lock = lock_env();
    cleanup_env_vars();

    let temp_file = write_config(MINIMAL);
    let config = load_config(temp_file.path()).expect("Failed to load config");

    // Verify defaults are applied
    assert_eq!(config.application.log_level, "info");
    assert!(!config.application.dry_run);
    assert_eq!(config.shr.timeout_seconds, 30);
    assert_eq!(config.shr.retry.max_retries, 3);
    assert!(config.shr.tls_verify);
    assert_eq!(config.sync.max_failed_events, 5);
    assert_eq!(config.sync.page_size, 25);
    assert_eq!(config.sync.max_pages_per_run, 10);
    assert_eq!(config.sync.patient_feed_path, "catchments/{catchment}/patients");
    assert!(config.logging.local_enabled);
    assert_eq!(config.logging.local_rotation, "daily");
    assert!(config.postgresql.is_none());
}

#[test]
fn test_env_var_substitution() {
    let _lock = lock_env();
    cleanup_env_vars();
    std::env::set_var("TEST_SHRSYNC_IDP_PASSWORD", "secret_pass");
    std::env::set_var(
        "TEST_SHRSYNC_PG_URL",
        "postgresql://shrsync:pw@localhost:5432/shrsync",
    );

    let toml_content = MINIMAL
        .replace("database_target = \"memory\"", "database_target = \"postgresql\"")
        .replace(
            "password = \"secret\"",
            "password = \"${TEST_SHRSYNC_IDP_PASSWORD}\"",
        )
        + "\n[postgresql]\nconnection_string = \"${TEST_SHRSYNC_PG_URL}\"\n";

    let temp_file = write_config(&toml_content);
    let config = load_config(temp_file.path()).expect("Failed to load config");

    assert_eq!(config.identity.password.expose_secret(), "secret_pass");
    assert_eq!(
        config
            .postgresql
            .as_ref()
            .unwrap()
            .connection_string
            .expose_secret(),
        "postgresql://shrsync:pw@localhost:5432/shrsync"
    );

    cleanup_env_vars();
}

#[test]
fn test_missing_substitution_variable_is_reported() {
    let _lock = lock_env();
    cleanup_env_vars();

    let toml_content = MINIMAL.replace(
        "password = \"secret\"",
        "password = \"${TEST_SHRSYNC_IDP_PASSWORD}\"",
    );
    let temp_file = write_config(&toml_content);
    let err = load_config(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("TEST_SHRSYNC_IDP_PASSWORD"));
}

#[test]
fn test_env_var_overrides() {
    let _lock = lock_env();
    cleanup_env_vars();
    std::env::set_var("SHRSYNC_APPLICATION_LOG_LEVEL", "trace");
    std::env::set_var("SHRSYNC_SYNC_CATCHMENTS", "3026, 3027");
    std::env::set_var("SHRSYNC_SYNC_PAGE_SIZE", "100");

    let temp_file = write_config(MINIMAL);
    let config = load_config(temp_file.path()).expect("Failed to load config");

    // Verify env var overrides took effect
    assert_eq!(config.application.log_level, "trace");
    assert_eq!(config.sync.catchments, vec!["3026", "3027"]);
    assert_eq!(config.sync.page_size, 100);

    cleanup_env_vars();
}

#[test]
fn test_unparseable_override_is_rejected() {
    let _lock = lock_env();
    cleanup_env_vars();
    std::env::set_var("SHRSYNC_SYNC_PAGE_SIZE", "lots");

    let temp_file = write_config(MINIMAL);
    let result = load_config(temp_file.path());
    cleanup_env_vars();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("SHRSYNC_SYNC_PAGE_SIZE"));
}

#[test]
fn test_invalid_config_validation() {
    let _lock = lock_env();
    cleanup_env_vars();

    let cases = [
        MINIMAL.replace("[shr]", "[application]\nlog_level = \"loud\"\n\n[shr]"),
        MINIMAL.replace("catchments = [\"3026\"]", "catchments = [\"30-26\"]"),
        MINIMAL.replace("email = \"facility@example.org\"", "email = \"facility\""),
        MINIMAL.replace(
            "[assembly]",
            "page_size = 0\n\n[assembly]",
        ),
        MINIMAL.replace("database_target = \"memory\"", "database_target = \"postgresql\""),
    ];

    for toml_content in cases {
        let temp_file = write_config(&toml_content);
        let result = load_config(temp_file.path());
        assert!(result.is_err(), "accepted invalid config:\n{toml_content}");
    }
}

#[test]
fn test_production_requires_tls_verification() {
    let _lock = lock_env();
    cleanup_env_vars();

    let toml_content = format!(
        "environment = \"production\"\n{}",
        MINIMAL.replace(
            "facility_registry_url = \"https://fr.example.org/api/1.0\"",
            "facility_registry_url = \"https://fr.example.org/api/1.0\"\ntls_verify = false",
        )
    );
    let temp_file = write_config(&toml_content);
    assert!(load_config(temp_file.path()).is_err());
}
