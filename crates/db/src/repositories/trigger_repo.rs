//! Repository for the `triggers` table.
//!
//! Every mutation bumps `version`; [`TriggerRepo::update_if_version`] is the
//! optimistic-lock write used by sparse updates.

use beacon_core::trigger::TRIGGER_TYPE_SCHEDULED;
use beacon_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::trigger::{CreateTrigger, Trigger, TriggerChanges};
use crate::store::TriggerFilter;

/// Column list for `triggers` queries.
const COLUMNS: &str = "\
    id, name, trigger_type, schedule_time, api_payload, fired_at, \
    archived, archived_at, version, created_at, updated_at";

/// Predicate selecting the durable scheduling queue.
const DUE_PREDICATE: &str = "\
    trigger_type = $1 AND archived = false AND fired_at IS NULL";

/// Provides CRUD and scheduling queries for triggers.
pub struct TriggerRepo;

impl TriggerRepo {
    /// Insert a new trigger. Input must already be validated.
    pub async fn create(pool: &PgPool, input: &CreateTrigger) -> Result<Trigger, sqlx::Error> {
        let query = format!(
            "INSERT INTO triggers (name, trigger_type, schedule_time, api_payload) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Trigger>(&query)
            .bind(&input.name)
            .bind(&input.trigger_type)
            .bind(input.schedule_time)
            .bind(&input.api_payload)
            .fetch_one(pool)
            .await
    }

    /// Find a trigger by ID, archived or not.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Trigger>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM triggers WHERE id = $1");
        sqlx::query_as::<_, Trigger>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List triggers matching `filter`, ordered by id.
    pub async fn list(pool: &PgPool, filter: TriggerFilter) -> Result<Vec<Trigger>, sqlx::Error> {
        let predicate = match filter {
            TriggerFilter::Active => "WHERE archived = false",
            TriggerFilter::Archived => "WHERE archived = true",
            TriggerFilter::All => "",
        };
        let query = format!("SELECT {COLUMNS} FROM triggers {predicate} ORDER BY id");
        sqlx::query_as::<_, Trigger>(&query).fetch_all(pool).await
    }

    /// Write resolved changes only if the row is still at `expected_version`.
    ///
    /// Returns `None` when the version check fails (or the row vanished).
    pub async fn update_if_version(
        pool: &PgPool,
        id: DbId,
        expected_version: i64,
        changes: &TriggerChanges,
    ) -> Result<Option<Trigger>, sqlx::Error> {
        let query = format!(
            "UPDATE triggers SET \
                name = $3, trigger_type = $4, schedule_time = $5, api_payload = $6, \
                fired_at = $7, version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Trigger>(&query)
            .bind(id)
            .bind(expected_version)
            .bind(&changes.name)
            .bind(&changes.trigger_type)
            .bind(changes.schedule_time)
            .bind(&changes.api_payload)
            .bind(changes.fired_at)
            .fetch_optional(pool)
            .await
    }

    /// Archive a trigger if it is active.
    ///
    /// Returns `None` when the trigger is missing or already archived.
    pub async fn archive(pool: &PgPool, id: DbId) -> Result<Option<Trigger>, sqlx::Error> {
        let query = format!(
            "UPDATE triggers \
             SET archived = true, archived_at = NOW(), version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND archived = false \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Trigger>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Archive every active trigger created before `cutoff` in one transaction.
    pub async fn archive_created_before(
        pool: &PgPool,
        cutoff: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let result = sqlx::query(
            "UPDATE triggers \
             SET archived = true, archived_at = NOW(), version = version + 1, updated_at = NOW() \
             WHERE archived = false AND created_at < $1",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Due scheduled triggers, oldest schedule first, ties by id.
    pub async fn list_due(
        pool: &PgPool,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<Trigger>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM triggers \
             WHERE {DUE_PREDICATE} AND schedule_time <= $2 \
             ORDER BY schedule_time ASC, id ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Trigger>(&query)
            .bind(TRIGGER_TYPE_SCHEDULED)
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Earliest pending or due schedule time.
    pub async fn next_due_time(pool: &PgPool) -> Result<Option<Timestamp>, sqlx::Error> {
        let query = format!("SELECT MIN(schedule_time) FROM triggers WHERE {DUE_PREDICATE}");
        sqlx::query_scalar::<_, Option<Timestamp>>(&query)
            .bind(TRIGGER_TYPE_SCHEDULED)
            .fetch_one(pool)
            .await
    }

    /// Compare-and-set the FIRED marker.
    ///
    /// Returns `true` if this call transitioned the trigger to fired.
    pub async fn mark_fired(
        pool: &PgPool,
        id: DbId,
        schedule_time: Timestamp,
        fired_at: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE triggers \
             SET fired_at = $3, version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND schedule_time = $2 AND fired_at IS NULL",
        )
        .bind(id)
        .bind(schedule_time)
        .bind(fired_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
