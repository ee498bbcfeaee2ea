use std::sync::Arc;

use beacon_db::{EventLogStore, TriggerStore};
use beacon_worker::queue::FireQueue;
use beacon_worker::retention::RetentionManager;
use beacon_worker::triggers::TriggerService;
use beacon_worker::{Dispatcher, Engine};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; every field is behind an `Arc` or is a channel handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub triggers: Arc<TriggerService>,
    pub dispatcher: Arc<Dispatcher>,
    pub queue: FireQueue,
    pub retention: Arc<RetentionManager>,
    /// Read path for log queries; the cached decorator in production.
    pub logs: Arc<dyn EventLogStore>,
    /// Raw trigger store, used for health probes.
    pub store: Arc<dyn TriggerStore>,
}

impl AppState {
    /// Wire handler state to the services owned by `engine`.
    ///
    /// `logs` must be the same event log store the engine was built with so
    /// cache invalidation sees every write.
    pub fn new(
        config: ServerConfig,
        engine: &Engine,
        store: Arc<dyn TriggerStore>,
        logs: Arc<dyn EventLogStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            triggers: Arc::clone(&engine.triggers),
            dispatcher: Arc::clone(&engine.dispatcher),
            queue: engine.queue.clone(),
            retention: Arc::clone(&engine.retention),
            logs,
            store,
        }
    }
}
