use std::sync::Arc;
use std::time::Duration;

use beacon_db::PgStore;
use beacon_events::EventBus;
use beacon_worker::{Engine, EngineConfig, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_worker=debug,beacon_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store_config = StoreConfig::from_env();
    let engine_config = EngineConfig::from_env();
    let shutdown_timeout = Duration::from_secs(beacon_worker::config::env_or(
        "SHUTDOWN_TIMEOUT_SECS",
        "30",
    ));

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

    if store_config.run_migrations {
        beacon_db::run_migrations(&pool)
            .await
            .expect("Failed to run database migrations");
        tracing::info!("Database migrations applied");
    }

    let store = Arc::new(PgStore::new(pool, store_config.operation_timeout));
    let bus = Arc::new(EventBus::default());

    let mut engine = Engine::new(engine_config, store.clone(), store, bus);
    engine.spawn_background();
    tracing::info!("Worker running");

    shutdown_signal().await;
    engine.shutdown(shutdown_timeout).await;
    tracing::info!("Graceful shutdown complete");
}

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
