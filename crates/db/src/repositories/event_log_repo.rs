//! Repository for the `event_logs` table.
//!
//! Rows are append-only; the only mutation is flipping `archived`.

use beacon_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::event_log::{EventLog, NewEventLog};
use crate::store::{AppendOutcome, LogQuery};

/// Column list for `event_logs` queries.
const COLUMNS: &str = "\
    id, trigger_id, event_time, event_type, payload, idempotency_key, archived";

/// Provides append, query and archival operations for event logs.
pub struct EventLogRepo;

impl EventLogRepo {
    /// Append an entry without an idempotency key.
    pub async fn insert(pool: &PgPool, entry: &NewEventLog) -> Result<EventLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO event_logs (trigger_id, event_time, event_type, payload) \
             VALUES ($1, COALESCE($2, NOW()), $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, EventLog>(&query)
            .bind(entry.trigger_id)
            .bind(entry.event_time)
            .bind(&entry.event_type)
            .bind(&entry.payload)
            .fetch_one(pool)
            .await
    }

    /// Append an entry unless `key` is already recorded.
    ///
    /// The insert and the fallback lookup run in one transaction. A concurrent
    /// insert of the same key blocks on the unique index until the other
    /// transaction resolves, then falls through to the lookup.
    pub async fn insert_once(
        pool: &PgPool,
        entry: &NewEventLog,
        key: &str,
    ) -> Result<AppendOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let insert_query = format!(
            "INSERT INTO event_logs (trigger_id, event_time, event_type, payload, idempotency_key) \
             VALUES ($1, COALESCE($2, NOW()), $3, $4, $5) \
             ON CONFLICT (idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, EventLog>(&insert_query)
            .bind(entry.trigger_id)
            .bind(entry.event_time)
            .bind(&entry.event_type)
            .bind(&entry.payload)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match inserted {
            Some(log) => AppendOutcome::Inserted(log),
            None => {
                let select_query =
                    format!("SELECT {COLUMNS} FROM event_logs WHERE idempotency_key = $1");
                let existing = sqlx::query_as::<_, EventLog>(&select_query)
                    .bind(key)
                    .fetch_one(&mut *tx)
                    .await?;
                AppendOutcome::Existing(existing)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Query entries ordered by event time, then id.
    pub async fn query(pool: &PgPool, filter: &LogQuery) -> Result<Vec<EventLog>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM event_logs \
             WHERE archived = $1 \
               AND ($2::TIMESTAMPTZ IS NULL OR event_time >= $2) \
               AND ($3::BIGINT IS NULL OR trigger_id = $3) \
             ORDER BY event_time ASC, id ASC"
        );
        sqlx::query_as::<_, EventLog>(&query)
            .bind(filter.archived)
            .bind(filter.since)
            .bind(filter.trigger_id)
            .fetch_all(pool)
            .await
    }

    /// Count entries recorded for a trigger, archived or not.
    pub async fn count_for_trigger(pool: &PgPool, trigger_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM event_logs WHERE trigger_id = $1")
            .bind(trigger_id)
            .fetch_one(pool)
            .await
    }

    /// Archive every active entry older than `cutoff` in one transaction.
    pub async fn archive_before(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let result = sqlx::query(
            "UPDATE event_logs SET archived = true \
             WHERE archived = false AND event_time < $1",
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
