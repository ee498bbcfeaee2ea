use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use beacon_core::retention::{DEFAULT_LOG_RETENTION_DAYS, DEFAULT_TRIGGER_RETENTION_DAYS};
use beacon_core::trigger::DEFAULT_FIRE_BUCKET_SECS;

/// Read `name` from the environment, falling back to `default`.
///
/// Panics with a descriptive message when the value does not parse; only
/// called during startup wiring.
pub fn env_or<T>(name: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .unwrap_or_else(|e| panic!("{name} must be a valid {}: {e}", std::any::type_name::<T>()))
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on the scheduler's sleep between sweeps.
    pub poll_interval: Duration,
    /// Maximum due triggers dispatched per sweep.
    pub batch_size: i64,
    /// Width of the manual/api idempotency bucket, in seconds.
    pub fire_bucket_secs: i64,
    pub trigger_retention_days: i64,
    pub log_retention_days: i64,
    pub retention_interval: Duration,
    pub queue_workers: usize,
    pub queue_capacity: usize,
    pub queue_max_attempts: u32,
    /// Upper bound on invocations waiting for their `not_before`.
    pub queue_max_deferred: usize,
    /// First retry delay of the fire queue; doubles per attempt.
    pub queue_base_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            fire_bucket_secs: DEFAULT_FIRE_BUCKET_SECS,
            trigger_retention_days: DEFAULT_TRIGGER_RETENTION_DAYS,
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
            retention_interval: Duration::from_secs(3600),
            queue_workers: 4,
            queue_capacity: 1024,
            queue_max_attempts: 5,
            queue_max_deferred: 10_000,
            queue_base_backoff: Duration::from_millis(200),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default |
    /// |--------------------------------|---------|
    /// | `SCHEDULER_POLL_INTERVAL_SECS` | `5`     |
    /// | `SCHEDULER_BATCH_SIZE`         | `100`   |
    /// | `FIRE_BUCKET_SECS`             | `1`     |
    /// | `TRIGGER_RETENTION_DAYS`       | `30`    |
    /// | `LOG_RETENTION_DAYS`           | `7`     |
    /// | `RETENTION_INTERVAL_SECS`      | `3600`  |
    /// | `FIRE_QUEUE_WORKERS`           | `4`     |
    /// | `FIRE_QUEUE_CAPACITY`          | `1024`  |
    /// | `FIRE_QUEUE_MAX_ATTEMPTS`      | `5`     |
    /// | `FIRE_QUEUE_MAX_DEFERRED`      | `10000` |
    pub fn from_env() -> Self {
        let config = Self {
            poll_interval: Duration::from_secs(env_or("SCHEDULER_POLL_INTERVAL_SECS", "5")),
            batch_size: env_or("SCHEDULER_BATCH_SIZE", "100"),
            fire_bucket_secs: env_or("FIRE_BUCKET_SECS", "1"),
            trigger_retention_days: env_or("TRIGGER_RETENTION_DAYS", "30"),
            log_retention_days: env_or("LOG_RETENTION_DAYS", "7"),
            retention_interval: Duration::from_secs(env_or("RETENTION_INTERVAL_SECS", "3600")),
            queue_workers: env_or("FIRE_QUEUE_WORKERS", "4"),
            queue_capacity: env_or("FIRE_QUEUE_CAPACITY", "1024"),
            queue_max_attempts: env_or("FIRE_QUEUE_MAX_ATTEMPTS", "5"),
            queue_max_deferred: env_or("FIRE_QUEUE_MAX_DEFERRED", "10000"),
            ..Self::default()
        };

        assert!(config.batch_size > 0, "SCHEDULER_BATCH_SIZE must be positive");
        assert!(config.fire_bucket_secs > 0, "FIRE_BUCKET_SECS must be positive");
        assert!(config.queue_workers > 0, "FIRE_QUEUE_WORKERS must be positive");
        assert!(config.queue_capacity > 0, "FIRE_QUEUE_CAPACITY must be positive");
        assert!(
            config.queue_max_deferred > 0,
            "FIRE_QUEUE_MAX_DEFERRED must be positive"
        );
        assert!(
            !config.poll_interval.is_zero(),
            "SCHEDULER_POLL_INTERVAL_SECS must be positive"
        );
        config
    }
}

/// Database configuration shared by the API and worker binaries.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Bound on every store operation and on pool acquisition.
    pub operation_timeout: Duration,
    pub run_migrations: bool,
}

impl StoreConfig {
    /// | Env Var                    | Default    |
    /// |----------------------------|------------|
    /// | `DATABASE_URL`             | (required) |
    /// | `DATABASE_MAX_CONNECTIONS` | `20`       |
    /// | `STORE_TIMEOUT_SECS`       | `5`        |
    /// | `RUN_MIGRATIONS`           | `true`     |
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", "20"),
            operation_timeout: Duration::from_secs(env_or("STORE_TIMEOUT_SECS", "5")),
            run_migrations: env_or("RUN_MIGRATIONS", "true"),
        }
    }
}
