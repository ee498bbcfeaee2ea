//! Shared query parameter types for API handlers.

use beacon_core::error::CoreError;
use beacon_core::retention::validate_retention_days;
use beacon_core::types::{DbId, Timestamp};
use beacon_db::{LogQuery, TriggerFilter};
use chrono::DurationRound;
use serde::Deserialize;

/// Relative log windows are anchored to `now` truncated to this step, so
/// repeated requests within it resolve to the same query and cache key.
pub const WINDOW_STEP_SECS: i64 = 60;

/// `?status=active|archived|all` for trigger listings.
#[derive(Debug, Deserialize)]
pub struct TriggerListParams {
    #[serde(default)]
    pub status: TriggerFilter,
}

/// `?older_than_days=` for bulk archival endpoints.
#[derive(Debug, Deserialize)]
pub struct OlderThanParams {
    pub older_than_days: Option<i64>,
}

impl OlderThanParams {
    /// The requested age, or `default_days` when omitted.
    pub fn age(&self, default_days: i64) -> Result<chrono::Duration, CoreError> {
        validate_retention_days(self.older_than_days.unwrap_or(default_days))
    }
}

/// Filters accepted by `GET /logs`.
///
/// The time filters combine: when more than one of `since`, `last_hours` and
/// `filter_last_2_hours` is given, the latest resulting lower bound wins.
/// The relative windows may reach up to [`WINDOW_STEP_SECS`] further back
/// than their nominal length; an explicit `since` is used as given.
#[derive(Debug, Default, Deserialize)]
pub struct LogQueryParams {
    #[serde(default)]
    pub archived: bool,
    pub since: Option<Timestamp>,
    pub last_hours: Option<i64>,
    #[serde(default)]
    pub filter_last_2_hours: bool,
    pub trigger_id: Option<DbId>,
}

impl LogQueryParams {
    /// Resolve the parameters into a store query relative to `now`.
    pub fn into_query(self, now: Timestamp) -> Result<LogQuery, CoreError> {
        let anchor = window_anchor(now);
        let last_hours = match self.last_hours {
            Some(hours) if hours <= 0 => {
                return Err(CoreError::Validation(format!(
                    "last_hours must be positive, got {hours}"
                )))
            }
            Some(hours) => Some(anchor - chrono::Duration::hours(hours)),
            None => None,
        };
        let last_two = self
            .filter_last_2_hours
            .then(|| anchor - chrono::Duration::hours(2));

        let since = [self.since, last_hours, last_two].into_iter().flatten().max();

        Ok(LogQuery {
            archived: self.archived,
            since,
            trigger_id: self.trigger_id,
        })
    }
}

fn window_anchor(now: Timestamp) -> Timestamp {
    now.duration_trunc(chrono::Duration::seconds(WINDOW_STEP_SECS))
        .unwrap_or(now)
}
