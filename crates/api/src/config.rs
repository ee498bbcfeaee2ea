use beacon_worker::config::env_or;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on draining the engine after the listener stops.
    pub shutdown_timeout_secs: u64,
    /// Run the scheduler and retention loops in this process.
    pub run_engine: bool,
    pub log_cache_enabled: bool,
    pub log_cache_ttl_secs: u64,
    pub log_cache_max_entries: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `RUN_ENGINE`            | `true`                  |
    /// | `LOG_CACHE_ENABLED`     | `true`                  |
    /// | `LOG_CACHE_TTL_SECS`    | `600`                   |
    /// | `LOG_CACHE_MAX_ENTRIES` | `1024`                  |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins = parse_origins(
            &std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:5173".into()),
        );

        Self {
            host,
            port: env_or("PORT", "3000"),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", "30"),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", "30"),
            run_engine: env_or("RUN_ENGINE", "true"),
            log_cache_enabled: env_or("LOG_CACHE_ENABLED", "true"),
            log_cache_ttl_secs: env_or("LOG_CACHE_TTL_SECS", "600"),
            log_cache_max_entries: env_or("LOG_CACHE_MAX_ENTRIES", "1024"),
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
