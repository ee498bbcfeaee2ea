//! Engine supervisor.
//!
//! Builds the services over a pair of stores and owns the background tasks:
//! the fire-queue workers always, the scheduler and retention loops when
//! [`Engine::spawn_background`] is called. Every task shares one
//! [`CancellationToken`]; [`Engine::shutdown`] cancels it and waits for the
//! tasks to finish their current unit of work.

use std::sync::Arc;
use std::time::Duration;

use beacon_db::{EventLogStore, TriggerStore};
use beacon_events::EventBus;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::queue::{FireQueue, QueueConfig};
use crate::retention::RetentionManager;
use crate::scheduler::Scheduler;
use crate::triggers::TriggerService;

pub struct Engine {
    pub triggers: Arc<TriggerService>,
    pub dispatcher: Arc<Dispatcher>,
    pub retention: Arc<RetentionManager>,
    pub queue: FireQueue,
    trigger_store: Arc<dyn TriggerStore>,
    bus: Arc<EventBus>,
    config: EngineConfig,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Build the services and start the fire-queue workers.
    pub fn new(
        config: EngineConfig,
        trigger_store: Arc<dyn TriggerStore>,
        log_store: Arc<dyn EventLogStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        let cancel = CancellationToken::new();

        let triggers = Arc::new(TriggerService::new(
            Arc::clone(&trigger_store),
            Arc::clone(&log_store),
            Arc::clone(&bus),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&trigger_store),
            Arc::clone(&log_store),
            Arc::clone(&bus),
            config.fire_bucket_secs,
        ));
        let retention = Arc::new(RetentionManager::new(
            Arc::clone(&trigger_store),
            log_store,
            Arc::clone(&bus),
            config.trigger_retention_days,
            config.log_retention_days,
            config.retention_interval,
        ));
        let (queue, handles) = FireQueue::start(
            Arc::clone(&dispatcher),
            QueueConfig {
                workers: config.queue_workers,
                capacity: config.queue_capacity,
                max_attempts: config.queue_max_attempts,
                max_deferred: config.queue_max_deferred,
                base_backoff: config.queue_base_backoff,
            },
            cancel.clone(),
        );

        Self {
            triggers,
            dispatcher,
            retention,
            queue,
            trigger_store,
            bus,
            config,
            cancel,
            handles,
        }
    }

    /// Spawn the scheduler and retention loops.
    pub fn spawn_background(&mut self) {
        let scheduler = Scheduler::new(
            Arc::clone(&self.trigger_store),
            Arc::clone(&self.dispatcher),
            self.config.poll_interval,
            self.config.batch_size,
        );
        // Subscribe before spawning so no trigger change is missed.
        let events = self.bus.subscribe();
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            scheduler.run(cancel, events).await;
        }));

        let retention = Arc::clone(&self.retention);
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            retention.run(cancel).await;
        }));

        tracing::info!("Engine background tasks started (scheduler, retention)");
    }

    /// Cancel all background tasks and wait up to `timeout` for them.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();
        let tasks = self.handles.len();
        match tokio::time::timeout(timeout, futures::future::join_all(self.handles)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    tracing::error!(panicked, "Engine tasks ended abnormally");
                }
                tracing::info!(tasks, "Engine stopped");
            }
            Err(_) => {
                tracing::warn!(
                    tasks,
                    timeout_secs = timeout.as_secs(),
                    "Engine shutdown timed out"
                );
            }
        }
    }
}
