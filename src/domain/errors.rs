//! Domain error types
//!
//! This module defines the error hierarchy for shrsync.
//! All errors are domain-specific and don't expose third-party types.

use thiserror::Error;

/// Main shrsync error type
///
/// This is the primary error type used throughout the application.
/// The sync engine classifies errors with [`SyncError::aborts_run`] and
/// [`SyncError::is_retryable`] to decide between recording a failed event and
/// stopping the run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Errors from the SHR, the patient registry or the local EMR
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Persistence errors (identity mappings, markers, failed events)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Errors raised while building an encounter bundle
    #[error("Assembly error: {0}")]
    Assembly(String),

    /// A referenced encounter has not been pushed to the SHR yet
    #[error("Encounter {0} is not yet synced to the SHR")]
    EncounterNotYetSynced(String),

    /// The patient has no health id mapping yet
    #[error("Patient {0} is not yet synced to the patient registry")]
    PatientNotYetSynced(String),

    /// A health id rewrite could not be applied atomically
    #[error("Identity integrity error: {0}")]
    IdentityIntegrity(String),

    /// Change feed errors
    #[error("Feed error: {0}")]
    Feed(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network/connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Errors that stop the whole feed run instead of a single event.
    ///
    /// The marker is left where it was and no failed event is recorded.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            SyncError::Authentication(_)
                | SyncError::Registry(RegistryError::Unauthorized(_))
                | SyncError::IdentityIntegrity(_)
                | SyncError::Storage(_)
                | SyncError::Configuration(_)
        )
    }

    /// Whether a later retry of the same event can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Registry(e) => e.is_retryable(),
            SyncError::Connection(_)
            | SyncError::Feed(_)
            | SyncError::PatientNotYetSynced(_)
            | SyncError::EncounterNotYetSynced(_) => true,
            _ => false,
        }
    }
}

/// Remote registry errors
///
/// Errors that occur when talking to the SHR, the patient registry, the
/// identity server or the local EMR. These errors don't expose HTTP client types.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to the remote server
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// 401 from a remote; the cached session token must be discarded
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid response from server
    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server error (5xx)
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Client error (4xx)
    #[error("Client error: {status} - {message}")]
    ClientError { status: u16, message: String },

    /// Timeout
    #[error("Request timeout: {0}")]
    Timeout(String),
}

impl RegistryError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::ConnectionFailed(_)
                | RegistryError::ServerError { .. }
                | RegistryError::Timeout(_)
        )
    }
}

/// Context attached to a failed feed event
#[derive(Debug, Clone)]
pub struct EventErrorDetail {
    /// Feed the event was read from
    pub feed_url: Option<String>,

    /// Feed entry id
    pub event_id: Option<String>,

    /// Error message
    pub message: String,

    /// Whether the error is retryable
    pub retryable: bool,
}

impl EventErrorDetail {
    /// Creates a new event error detail
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            feed_url: None,
            event_id: None,
            message: message.into(),
            retryable: false,
        }
    }

    /// Detail of a sync error, retryable when a later run may succeed
    pub fn from_error(error: &SyncError) -> Self {
        Self {
            retryable: error.is_retryable(),
            ..Self::new(error.to_string())
        }
    }

    /// Sets the feed URL
    pub fn with_feed_url(mut self, feed_url: impl Into<String>) -> Self {
        self.feed_url = Some(feed_url.into());
        self
    }

    /// Sets the event id
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Marks the error as retryable
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl std::fmt::Display for EventErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.feed_url, &self.event_id) {
            (Some(feed), Some(event)) => write!(f, "[{feed} #{event}] {}", self.message),
            (None, Some(event)) => write!(f, "[#{event}] {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Configuration(format!("TOML parse error: {err}"))
    }
}
