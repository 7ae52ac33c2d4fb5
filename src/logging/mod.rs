//! Logging and observability
//!
//! This module provides structured logging with support for:
//! - Console output filtered by level or `RUST_LOG`
//! - JSON log files with rotation
//! - Sync-specific log macros with consistent field names
//!
//! # Example
//!
//! ```no_run
//! use shrsync::logging::init_logging;
//! use shrsync::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the start of a feed run
///
/// # Example
///
/// ```no_run
/// use shrsync::log_sync_start;
///
/// let marker: Option<String> = Some("tag:42".to_string());
/// log_sync_start!("https://shr.example.org/catchments/3026/encounters", marker);
/// ```
#[macro_export]
macro_rules! log_sync_start {
    ($feed:expr, $marker:expr) => {
        tracing::info!(
            feed = %$feed,
            marker = ?$marker,
            "Starting feed run"
        );
    };
}

/// Log the completion of a feed run
///
/// # Example
///
/// ```no_run
/// use shrsync::log_sync_complete;
/// use std::time::Duration;
///
/// log_sync_complete!("https://shr.example.org/catchments/3026/encounters", 12, 1, Duration::from_secs(3));
/// ```
#[macro_export]
macro_rules! log_sync_complete {
    ($feed:expr, $processed:expr, $failed:expr, $duration:expr) => {
        tracing::info!(
            feed = %$feed,
            processed = $processed,
            failed = $failed,
            duration_ms = $duration.as_millis(),
            "Feed run completed"
        );
    };
}

/// Log a feed event that could not be processed
///
/// # Example
///
/// ```no_run
/// use shrsync::log_event_failure;
/// use shrsync::domain::SyncError;
///
/// let error = SyncError::EncounterNotYetSynced("enc-1".to_string());
/// log_event_failure!("http://emr.local/feed/encounter", "tag:7", &error);
/// ```
#[macro_export]
macro_rules! log_event_failure {
    ($feed:expr, $event_id:expr, $error:expr) => {{
        let detail = $crate::domain::EventErrorDetail::from_error(&$error);
        tracing::error!(
            feed = %$feed,
            event_id = %$event_id,
            error = %detail.message,
            retryable = detail.retryable,
            "Failed to process feed event"
        );
    }};
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use shrsync::log_retry_attempt;
///
/// log_retry_attempt!(2, 3, "Connection timeout");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($attempt:expr, $max_attempts:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            reason = %$reason,
            "Retrying operation"
        );
    };
}

#[cfg(test)]
mod tests {
    use crate::domain::SyncError;
    use std::time::Duration;

    #[test]
    fn test_macros_expand_without_subscriber() {
        let marker: Option<String> = None;
        log_sync_start!("http://emr.local/feed/encounter", marker);
        log_sync_complete!("http://emr.local/feed/encounter", 3, 0, Duration::from_millis(15));
        let error = SyncError::Feed("bad page".to_string());
        log_event_failure!("http://emr.local/feed/encounter", "tag:1", &error);
        log_retry_attempt!(1, 3, "timeout");
    }
}
