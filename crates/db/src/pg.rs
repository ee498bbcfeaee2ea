//! PostgreSQL implementation of the store traits.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::retention;
use beacon_core::types::{DbId, Timestamp};

use crate::models::event_log::{EventLog, NewEventLog};
use crate::models::trigger::{CreateTrigger, Trigger, UpdateTrigger};
use crate::repositories::{EventLogRepo, TriggerRepo};
use crate::store::{AppendOutcome, EventLogStore, LogQuery, TriggerFilter, TriggerStore};
use crate::{map_sqlx_error, DbPool};

/// Default bound on a single store operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Trigger and event log store backed by PostgreSQL.
///
/// Every operation is bounded by `op_timeout`; an elapsed timeout drops the
/// in-flight future (rolling back any open transaction) and surfaces as
/// [`CoreError::StoreUnavailable`].
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    op_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: DbPool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(map_sqlx_error),
            Err(_) => {
                tracing::warn!(
                    op,
                    timeout_ms = self.op_timeout.as_millis() as u64,
                    "Store operation timed out"
                );
                Err(CoreError::StoreUnavailable(format!(
                    "{op} timed out after {}ms",
                    self.op_timeout.as_millis()
                )))
            }
        }
    }

    fn trigger_not_found(id: DbId) -> CoreError {
        CoreError::NotFound {
            entity: "Trigger",
            id,
        }
    }
}

#[async_trait]
impl TriggerStore for PgStore {
    async fn create(&self, input: &CreateTrigger) -> Result<Trigger, CoreError> {
        input.check()?;
        self.timed("trigger.create", TriggerRepo::create(&self.pool, input))
            .await
    }

    async fn get(&self, id: DbId) -> Result<Trigger, CoreError> {
        self.timed("trigger.get", TriggerRepo::find_by_id(&self.pool, id))
            .await?
            .ok_or_else(|| Self::trigger_not_found(id))
    }

    async fn update(&self, id: DbId, patch: &UpdateTrigger) -> Result<Trigger, CoreError> {
        let current = self.get(id).await?;
        let changes = patch.merge(&current)?;
        self.timed(
            "trigger.update",
            TriggerRepo::update_if_version(&self.pool, id, current.version, &changes),
        )
        .await?
        .ok_or(CoreError::ConcurrentModification {
            entity: "Trigger",
            id,
        })
    }

    async fn list(&self, filter: TriggerFilter) -> Result<Vec<Trigger>, CoreError> {
        self.timed("trigger.list", TriggerRepo::list(&self.pool, filter))
            .await
    }

    async fn archive(&self, id: DbId) -> Result<Trigger, CoreError> {
        if let Some(archived) = self
            .timed("trigger.archive", TriggerRepo::archive(&self.pool, id))
            .await?
        {
            return Ok(archived);
        }
        // Either already archived (idempotent success) or missing.
        self.get(id).await
    }

    async fn archive_older_than(
        &self,
        age: chrono::Duration,
        as_of: Timestamp,
    ) -> Result<u64, CoreError> {
        let cutoff = retention::cutoff(as_of, age);
        self.timed(
            "trigger.archive_older_than",
            TriggerRepo::archive_created_before(&self.pool, cutoff),
        )
        .await
    }

    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Trigger>, CoreError> {
        self.timed("trigger.list_due", TriggerRepo::list_due(&self.pool, now, limit))
            .await
    }

    async fn next_due_time(&self) -> Result<Option<Timestamp>, CoreError> {
        self.timed("trigger.next_due_time", TriggerRepo::next_due_time(&self.pool))
            .await
    }

    async fn mark_fired(
        &self,
        id: DbId,
        schedule_time: Timestamp,
        fired_at: Timestamp,
    ) -> Result<bool, CoreError> {
        self.timed(
            "trigger.mark_fired",
            TriggerRepo::mark_fired(&self.pool, id, schedule_time, fired_at),
        )
        .await
    }

    async fn ping(&self) -> Result<(), CoreError> {
        self.timed("health_check", crate::health_check(&self.pool))
            .await
    }
}

#[async_trait]
impl EventLogStore for PgStore {
    async fn append(&self, entry: &NewEventLog) -> Result<EventLog, CoreError> {
        entry.check()?;
        self.timed("event_log.append", EventLogRepo::insert(&self.pool, entry))
            .await
    }

    async fn append_once(
        &self,
        entry: &NewEventLog,
        idempotency_key: &str,
    ) -> Result<AppendOutcome, CoreError> {
        entry.check()?;
        self.timed(
            "event_log.append_once",
            EventLogRepo::insert_once(&self.pool, entry, idempotency_key),
        )
        .await
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<EventLog>, CoreError> {
        self.timed("event_log.query", EventLogRepo::query(&self.pool, query))
            .await
    }

    async fn archive_older_than(
        &self,
        age: chrono::Duration,
        as_of: Timestamp,
    ) -> Result<u64, CoreError> {
        let cutoff = retention::cutoff(as_of, age);
        self.timed(
            "event_log.archive_older_than",
            EventLogRepo::archive_before(&self.pool, cutoff),
        )
        .await
    }
}
