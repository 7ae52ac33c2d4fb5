//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{DatabaseTarget, Environment, ShrSyncConfig};
use super::secret_string;
use crate::domain::errors::SyncError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (`${VAR}` syntax)
/// 3. Parses the TOML into [`ShrSyncConfig`]
/// 4. Applies environment variable overrides (`SHRSYNC_*` prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns [`SyncError::Configuration`] if the file is missing or unreadable,
/// a referenced variable is unset, parsing fails or validation fails.
///
/// # Examples
///
/// ```no_run
/// use shrsync::config::load_config;
///
/// let config = load_config("shrsync.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<ShrSyncConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(SyncError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        SyncError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses, overrides and validates configuration text
pub fn parse_config(contents: &str) -> Result<ShrSyncConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: ShrSyncConfig = toml::from_str(&contents)
        .map_err(|e| SyncError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        SyncError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format `${VAR_NAME}`
///
/// Comment lines are copied through untouched.
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| SyncError::Configuration(format!("Invalid substitution pattern: {e}")))?;
    let mut lines = Vec::new();
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_string());
            continue;
        }

        let processed = re.replace_all(line, |cap: &regex::Captures| {
            let var_name = &cap[1];
            std::env::var(var_name).unwrap_or_else(|_| {
                if !missing_vars.iter().any(|v| v == var_name) {
                    missing_vars.push(var_name.to_string());
                }
                String::new()
            })
        });
        lines.push(processed.into_owned());
    }

    if !missing_vars.is_empty() {
        return Err(SyncError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(lines.join("\n"))
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env(name) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            SyncError::Configuration(format!("Invalid value for {name}: '{raw}'"))
        }),
        None => Ok(None),
    }
}

/// Applies environment variable overrides using the `SHRSYNC_*` prefix
///
/// Variables follow the pattern `SHRSYNC_<SECTION>_<KEY>`, for example
/// `SHRSYNC_SHR_BASE_URL` or `SHRSYNC_SYNC_CATCHMENTS` (comma separated).
fn apply_env_overrides(config: &mut ShrSyncConfig) -> Result<()> {
    // Application overrides
    if let Some(val) = env("SHRSYNC_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = env_parsed("SHRSYNC_APPLICATION_DRY_RUN")? {
        config.application.dry_run = val;
    }
    if let Some(val) = env("SHRSYNC_ENVIRONMENT") {
        config.environment = match val.to_lowercase().as_str() {
            "development" => Environment::Development,
            "staging" => Environment::Staging,
            "production" => Environment::Production,
            other => {
                return Err(SyncError::Configuration(format!(
                    "Invalid SHRSYNC_ENVIRONMENT '{other}'"
                )))
            }
        };
    }

    // Registry overrides
    if let Some(val) = env("SHRSYNC_SHR_BASE_URL") {
        config.shr.base_url = val;
    }
    if let Some(val) = env("SHRSYNC_SHR_PATIENT_REGISTRY_URL") {
        config.shr.patient_registry_url = val;
    }
    if let Some(val) = env("SHRSYNC_SHR_FACILITY_REGISTRY_URL") {
        config.shr.facility_registry_url = val;
    }
    if let Some(val) = env("SHRSYNC_SHR_PROVIDER_REGISTRY_URL") {
        config.shr.provider_registry_url = Some(val);
    }
    if let Some(val) = env_parsed("SHRSYNC_SHR_TLS_VERIFY")? {
        config.shr.tls_verify = val;
    }

    // Identity overrides
    if let Some(val) = env("SHRSYNC_IDENTITY_CLIENT_ID") {
        config.identity.client_id = val;
    }
    if let Some(val) = env("SHRSYNC_IDENTITY_AUTH_TOKEN") {
        config.identity.auth_token = secret_string(val);
    }
    if let Some(val) = env("SHRSYNC_IDENTITY_EMAIL") {
        config.identity.email = val;
    }
    if let Some(val) = env("SHRSYNC_IDENTITY_PASSWORD") {
        config.identity.password = secret_string(val);
    }

    // Local EMR overrides
    if let Some(val) = env("SHRSYNC_EMR_BASE_URL") {
        config.emr.base_url = val;
    }
    if let Some(val) = env("SHRSYNC_EMR_USERNAME") {
        config.emr.username = val;
    }
    if let Some(val) = env("SHRSYNC_EMR_PASSWORD") {
        config.emr.password = secret_string(val);
    }

    // Sync overrides
    if let Some(val) = env("SHRSYNC_SYNC_CATCHMENTS") {
        config.sync.catchments = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(val) = env_parsed("SHRSYNC_SYNC_MAX_FAILED_EVENTS")? {
        config.sync.max_failed_events = val;
    }
    if let Some(val) = env_parsed("SHRSYNC_SYNC_PAGE_SIZE")? {
        config.sync.page_size = val;
    }

    // Database overrides
    if let Some(val) = env("SHRSYNC_DATABASE_TARGET") {
        config.database_target = match val.to_lowercase().as_str() {
            "postgresql" => DatabaseTarget::PostgreSQL,
            "memory" => DatabaseTarget::Memory,
            other => {
                return Err(SyncError::Configuration(format!(
                    "Invalid SHRSYNC_DATABASE_TARGET '{other}'"
                )))
            }
        };
    }
    if let Some(ref mut pg) = config.postgresql {
        if let Some(val) = env("SHRSYNC_POSTGRESQL_CONNECTION_STRING") {
            pg.connection_string = secret_string(val);
        }
        if let Some(val) = env_parsed("SHRSYNC_POSTGRESQL_MAX_CONNECTIONS")? {
            pg.max_connections = val;
        }
    }

    // Logging overrides
    if let Some(val) = env_parsed("SHRSYNC_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = val;
    }
    if let Some(val) = env("SHRSYNC_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
database_target = "memory"

[application]
log_level = "info"

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
local_patient_feed_url = "http://emr.local/openmrs/ws/atomfeed/patient"
local_encounter_feed_url = "http://emr.local/openmrs/ws/atomfeed/encounter"

[assembly]
default_facility_id = "10019841"
"#;

    #[test]
    fn test_substitute_env_vars() {
        std::env::set_var("SHRSYNC_TEST_SUBST_VAR", "test_value");
        let input = "password = \"${SHRSYNC_TEST_SUBST_VAR}\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "password = \"test_value\"");
        std::env::remove_var("SHRSYNC_TEST_SUBST_VAR");
    }

    #[test]
    fn test_substitute_env_vars_missing() {
        std::env::remove_var("SHRSYNC_TEST_MISSING_VAR");
        let input = "password = \"${SHRSYNC_TEST_MISSING_VAR}\"";
        let err = substitute_env_vars(input).unwrap_err();
        assert!(err.to_string().contains("SHRSYNC_TEST_MISSING_VAR"));
    }

    #[test]
    fn test_substitute_skips_comments() {
        std::env::remove_var("SHRSYNC_TEST_COMMENTED_VAR");
        let input = "# password = \"${SHRSYNC_TEST_COMMENTED_VAR}\"\nname = \"x\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent.toml");
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_load_config_valid() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MINIMAL.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.shr.base_url, "https://shr.example.org/api/v1");
        assert_eq!(config.database_target, DatabaseTarget::Memory);
        assert_eq!(config.sync.max_failed_events, 5);
        assert_eq!(config.identity.password.expose_secret(), "secret");
        assert_eq!(config.environment, Environment::Development);
    }

    #[test]
    fn test_postgresql_section_required() {
        let text = MINIMAL.replace(
            "database_target = \"memory\"",
            "database_target = \"postgresql\"",
        );
        let err = parse_config(&text).unwrap_err();
        assert!(err.to_string().contains("postgresql configuration is required"));
    }

    #[test]
    fn test_catchment_feeds() {
        let config = parse_config(MINIMAL).unwrap();
        let feeds = config.catchment_feeds().unwrap();
        assert_eq!(feeds.len(), 1);
        let (catchment, patients, encounters) = &feeds[0];
        assert_eq!(catchment.as_str(), "3026");
        assert_eq!(
            patients.as_str(),
            "https://mci.example.org/api/v1/catchments/3026/patients"
        );
        assert_eq!(
            encounters.as_str(),
            "https://shr.example.org/api/v1/catchments/3026/encounters"
        );
    }
}
