//! Persistence layer for triggers and event logs.
//!
//! - [`store`] defines the [`TriggerStore`] and [`EventLogStore`] contracts
//!   the engine is written against.
//! - [`PgStore`] implements them on PostgreSQL through the zero-sized
//!   repositories in [`repositories`].
//! - [`InMemoryStore`] implements the same contract for tests and local runs.
//! - [`cache`] wraps any event log store with a read-path response cache.

use std::time::Duration;

use beacon_core::error::CoreError;
use sqlx::postgres::PgPoolOptions;

pub mod cache;
pub mod memory;
pub mod models;
pub mod pg;
pub mod repositories;
pub mod store;

pub use memory::InMemoryStore;
pub use pg::PgStore;
pub use store::{AppendOutcome, EventLogStore, LogQuery, TriggerFilter, TriggerStore};

pub type DbPool = sqlx::PgPool;

/// Default upper bound on the pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Create a connection pool from a database URL.
///
/// `acquire_timeout` bounds how long any caller waits for a connection so a
/// saturated or unreachable database surfaces as an error instead of a hang.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply all pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// Translate a sqlx error into the store-agnostic [`CoreError`] taxonomy.
///
/// - Connection, pool and timeout failures become `StoreUnavailable` so sweep
///   loops retry them on their next cycle.
/// - Serialization failures and deadlocks (`40001`, `40P01`) are transient
///   and also become `StoreUnavailable`.
/// - Unique violations (`23505`) become `Conflict`, check violations
///   (`23514`) become `Validation`.
/// - `RowNotFound` should be handled by callers that know the entity; if it
///   leaks here it is reported as `Internal`.
pub fn map_sqlx_error(err: sqlx::Error) -> CoreError {
    match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_) => CoreError::StoreUnavailable(err.to_string()),
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            match code.as_str() {
                "23505" => CoreError::Conflict(format!(
                    "Duplicate value violates unique constraint: {}",
                    db_err.constraint().unwrap_or("unknown")
                )),
                "23514" => CoreError::Validation(format!(
                    "Value violates check constraint: {}",
                    db_err.constraint().unwrap_or("unknown")
                )),
                "40001" | "40P01" | "57014" => CoreError::StoreUnavailable(db_err.to_string()),
                c if c.starts_with("08") => CoreError::StoreUnavailable(db_err.to_string()),
                _ => {
                    tracing::error!(error = %db_err, "Database error");
                    CoreError::Internal(db_err.to_string())
                }
            }
        }
        _ => {
            tracing::error!(error = %err, "Database error");
            CoreError::Internal(err.to_string())
        }
    }
}
