//! Result type alias for shrsync
//!
//! This module provides a convenient Result type alias that uses SyncError
//! as the error type.

use super::errors::SyncError;

/// Result type alias for shrsync operations
///
/// # Examples
///
/// ```
/// use shrsync::domain::result::Result;
/// use shrsync::domain::errors::SyncError;
///
/// fn lookup() -> Result<Option<String>> {
///     Ok(None)
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(SyncError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, SyncError>;
