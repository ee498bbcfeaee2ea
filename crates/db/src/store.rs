//! Store contracts shared by the PostgreSQL and in-memory implementations.
//!
//! All methods return [`CoreError`] so callers never see driver-specific
//! errors. Implementations must honour the same semantics; the tests in
//! `tests/store_contract.rs` run against [`crate::InMemoryStore`] and the
//! ignored tests in `tests/pg_store.rs` run the same scenarios on PostgreSQL.

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::types::{DbId, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::models::event_log::{EventLog, NewEventLog};
use crate::models::trigger::{CreateTrigger, Trigger, UpdateTrigger};

/// Which triggers a listing returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerFilter {
    #[default]
    Active,
    Archived,
    All,
}

impl TriggerFilter {
    pub fn matches(&self, trigger: &Trigger) -> bool {
        match self {
            Self::Active => !trigger.archived,
            Self::Archived => trigger.archived,
            Self::All => true,
        }
    }
}

/// Filters for event log queries. Results are ordered by `event_time`, then id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub archived: bool,
    pub since: Option<Timestamp>,
    pub trigger_id: Option<DbId>,
}

/// Prefix shared by every log-query cache key.
pub const LOG_CACHE_PREFIX: &str = "logs:";

impl LogQuery {
    pub fn matches(&self, log: &EventLog) -> bool {
        log.archived == self.archived
            && self.since.map_or(true, |since| log.event_time >= since)
            && self.trigger_id.map_or(true, |id| log.trigger_id == id)
    }

    /// Cache key parameterized by every filter field.
    pub fn cache_key(&self) -> String {
        let since = self
            .since
            .map(|t| t.timestamp_micros().to_string())
            .unwrap_or_else(|| "-".into());
        let trigger = self
            .trigger_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into());
        format!(
            "{LOG_CACHE_PREFIX}archived={}:since={since}:trigger={trigger}",
            self.archived
        )
    }
}

/// Result of an idempotent append.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// A new row was written.
    Inserted(EventLog),
    /// A row with the same idempotency key already existed; nothing was written.
    Existing(EventLog),
}

impl AppendOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    pub fn into_log(self) -> EventLog {
        match self {
            Self::Inserted(log) | Self::Existing(log) => log,
        }
    }
}

/// Durable record of trigger definitions and their lifecycle state.
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Validate and insert a trigger. Nothing is persisted on validation failure.
    async fn create(&self, input: &CreateTrigger) -> Result<Trigger, CoreError>;

    /// Fetch a trigger by id (archived or not).
    async fn get(&self, id: DbId) -> Result<Trigger, CoreError>;

    /// Apply a sparse update with an optimistic-lock check on `version`.
    ///
    /// Returns `ConcurrentModification` if another writer changed the row
    /// between the read and the write.
    async fn update(&self, id: DbId, patch: &UpdateTrigger) -> Result<Trigger, CoreError>;

    /// List triggers ordered by id.
    async fn list(&self, filter: TriggerFilter) -> Result<Vec<Trigger>, CoreError>;

    /// Archive a trigger. Archiving an archived trigger is a no-op success.
    async fn archive(&self, id: DbId) -> Result<Trigger, CoreError>;

    /// Archive every active trigger created before `as_of - age`, atomically.
    async fn archive_older_than(&self, age: Duration, as_of: Timestamp)
        -> Result<u64, CoreError>;

    /// Active, unfired scheduled triggers with `schedule_time <= now`,
    /// ordered by `schedule_time` then id.
    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Trigger>, CoreError>;

    /// Earliest `schedule_time` among active, unfired scheduled triggers.
    async fn next_due_time(&self) -> Result<Option<Timestamp>, CoreError>;

    /// Set the FIRED marker if the trigger is still unfired at `schedule_time`.
    ///
    /// Returns `false` when the trigger was already fired or rescheduled.
    async fn mark_fired(
        &self,
        id: DbId,
        schedule_time: Timestamp,
        fired_at: Timestamp,
    ) -> Result<bool, CoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), CoreError>;
}

/// Append-mostly record of fired events.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Append an entry. Durable before returning.
    async fn append(&self, entry: &NewEventLog) -> Result<EventLog, CoreError>;

    /// Append unless an entry with `idempotency_key` already exists. The check
    /// and the insert are one atomic unit of work.
    async fn append_once(
        &self,
        entry: &NewEventLog,
        idempotency_key: &str,
    ) -> Result<AppendOutcome, CoreError>;

    /// Query entries ordered by `event_time` ascending, then id.
    async fn query(&self, query: &LogQuery) -> Result<Vec<EventLog>, CoreError>;

    /// Archive every active entry with `event_time < as_of - age`, atomically.
    async fn archive_older_than(&self, age: Duration, as_of: Timestamp)
        -> Result<u64, CoreError>;
}
