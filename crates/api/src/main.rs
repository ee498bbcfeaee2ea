use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use beacon_api::app::build_app;
use beacon_api::config::ServerConfig;
use beacon_api::state::AppState;
use beacon_db::cache::{CachedEventLog, ResponseCache, TtlCache};
use beacon_db::{EventLogStore, PgStore};
use beacon_events::EventBus;
use beacon_worker::{Engine, EngineConfig, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "beacon_api=debug,beacon_worker=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let store_config = StoreConfig::from_env();
    let engine_config = EngineConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        run_engine = config.run_engine,
        "Loaded server configuration"
    );

    // --- Database ---
    let pool = beacon_db::create_pool(
        &store_config.database_url,
        store_config.max_connections,
        store_config.operation_timeout,
    )
    .await
    .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    beacon_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    if store_config.run_migrations {
        beacon_db::run_migrations(&pool)
            .await
            .expect("Failed to run database migrations");
        tracing::info!("Database migrations applied");
    }

    let store = Arc::new(PgStore::new(pool, store_config.operation_timeout));

    // --- Log read cache ---
    let cache: Option<Arc<dyn ResponseCache>> = if config.log_cache_enabled {
        Some(Arc::new(TtlCache::with_max_entries(
            config.log_cache_max_entries,
        )))
    } else {
        tracing::info!("Log cache disabled");
        None
    };
    let logs: Arc<dyn EventLogStore> = Arc::new(CachedEventLog::new(
        store.clone(),
        cache,
        Duration::from_secs(config.log_cache_ttl_secs),
    ));

    // --- Engine ---
    let bus = Arc::new(EventBus::default());
    let mut engine = Engine::new(engine_config, store.clone(), Arc::clone(&logs), bus);
    if config.run_engine {
        engine.spawn_background();
    } else {
        tracing::info!("Embedded engine disabled; scheduler and retention run elsewhere");
    }

    // --- Router ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let app = build_app(AppState::new(config, &engine, store, logs));

    // --- Start server ---
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, stopping engine");
    engine.shutdown(shutdown_timeout).await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
