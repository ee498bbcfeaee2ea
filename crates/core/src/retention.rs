//! Retention thresholds and cutoff arithmetic.

use chrono::Duration;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Triggers older than this many days are archived by default.
pub const DEFAULT_TRIGGER_RETENTION_DAYS: i64 = 30;

/// Event logs older than this many days are archived by default.
pub const DEFAULT_LOG_RETENTION_DAYS: i64 = 7;

/// Upper bound accepted for a retention age, in days.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Rows strictly older than the returned instant qualify for archival.
///
/// `as_of` is a snapshot taken once per sweep so rows created while the
/// sweep runs are never compared against a moving boundary.
pub fn cutoff(as_of: Timestamp, age: Duration) -> Timestamp {
    as_of - age
}

/// Validate a caller-supplied retention age in days.
pub fn validate_retention_days(days: i64) -> Result<Duration, CoreError> {
    if !(0..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(CoreError::Validation(format!(
            "older_than_days must be between 0 and {MAX_RETENTION_DAYS}, got {days}"
        )));
    }
    Ok(Duration::days(days))
}
