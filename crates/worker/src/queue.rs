//! Deferred firing on a pool of worker tasks.
//!
//! [`FireQueue::enqueue`] hands a [`FireRequest`] to the pool with an
//! earliest-execution hint. Deferred requests wait in a single timer task;
//! at most `max_deferred` may be waiting at once. Delivery is at-least-once:
//! transient failures are retried with exponential backoff up to
//! `max_attempts`, and the dispatcher's idempotency key absorbs any
//! duplicate delivery.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::error::CoreError;
use beacon_core::types::Timestamp;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;

use crate::dispatcher::{Dispatcher, FireRequest};

/// Upper bound on a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    pub capacity: usize,
    pub max_attempts: u32,
    pub max_deferred: usize,
    pub base_backoff: Duration,
}

/// A request waiting for its `not_before`, holding one deferral slot.
struct Deferred {
    request: FireRequest,
    delay: Duration,
    slot: OwnedSemaphorePermit,
}

/// Handle for submitting firings to the worker pool. Cheap to clone.
#[derive(Clone)]
pub struct FireQueue {
    sender: mpsc::Sender<FireRequest>,
    deferrals: mpsc::Sender<Deferred>,
    deferred_slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl FireQueue {
    /// Spawn `config.workers` worker tasks consuming from a bounded channel,
    /// plus the timer task holding deferred requests.
    ///
    /// Workers stop when `cancel` fires; a firing in progress completes
    /// first. Deferred requests still waiting are dropped.
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        config: QueueConfig,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (deferrals, deferred) = mpsc::channel(config.capacity.max(1));

        let mut handles: Vec<JoinHandle<()>> = (0..config.workers.max(1))
            .map(|worker| {
                let dispatcher = Arc::clone(&dispatcher);
                let receiver = Arc::clone(&receiver);
                let config = config.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(worker, dispatcher, receiver, config, cancel).await;
                })
            })
            .collect();
        handles.push(tokio::spawn(run_timer(
            sender.clone(),
            deferred,
            cancel.clone(),
        )));

        tracing::info!(
            workers = config.workers,
            capacity = config.capacity,
            max_attempts = config.max_attempts,
            max_deferred = config.max_deferred,
            "Fire queue started"
        );
        let queue = Self {
            sender,
            deferrals,
            deferred_slots: Arc::new(Semaphore::new(config.max_deferred.max(1))),
            cancel,
        };
        (queue, handles)
    }

    /// Submit a firing to run at or after `not_before` (immediately if
    /// absent or already past).
    ///
    /// Fails with `StoreUnavailable` when the queue has shut down or when
    /// every deferral slot is taken.
    pub async fn enqueue(
        &self,
        request: FireRequest,
        not_before: Option<Timestamp>,
    ) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() || self.sender.is_closed() {
            return Err(queue_closed());
        }

        let delay = not_before
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .filter(|d| !d.is_zero());
        let Some(delay) = delay else {
            return self.sender.send(request).await.map_err(|_| queue_closed());
        };

        let slot = Arc::clone(&self.deferred_slots)
            .try_acquire_owned()
            .map_err(|_| {
                CoreError::StoreUnavailable("too many deferred firings pending".to_string())
            })?;
        tracing::debug!(
            trigger_id = request.trigger_id,
            delay_ms = delay.as_millis() as u64,
            "Deferring firing"
        );
        self.deferrals
            .send(Deferred {
                request,
                delay,
                slot,
            })
            .await
            .map_err(|_| queue_closed())
    }
}

/// Hold deferred requests until their delay elapses, then hand them to the
/// workers. A slot is released once its request has been handed over.
async fn run_timer(
    sender: mpsc::Sender<FireRequest>,
    mut deferrals: mpsc::Receiver<Deferred>,
    cancel: CancellationToken,
) {
    let mut pending: DelayQueue<(FireRequest, OwnedSemaphorePermit)> = DelayQueue::new();
    let mut open = true;

    loop {
        if !open && pending.is_empty() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            deferred = deferrals.recv(), if open => match deferred {
                Some(deferred) => {
                    pending.insert((deferred.request, deferred.slot), deferred.delay);
                }
                None => open = false,
            },
            Some(expired) = pending.next(), if !pending.is_empty() => {
                let (request, _slot) = expired.into_inner();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = sender.send(request) => {
                        if sent.is_err() {
                            tracing::warn!("Fire queue closed before deferred firing was delivered");
                            break;
                        }
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        tracing::warn!(dropped = pending.len(), "Dropping deferred firings on shutdown");
    }
    tracing::debug!("Fire queue timer stopped");
}

fn queue_closed() -> CoreError {
    CoreError::StoreUnavailable("fire queue is shut down".to_string())
}

/// Delay before retry number `attempt` (1-based).
fn backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

async fn run_worker(
    worker: usize,
    dispatcher: Arc<Dispatcher>,
    receiver: Arc<Mutex<mpsc::Receiver<FireRequest>>>,
    config: QueueConfig,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => break,
            request = async { receiver.lock().await.recv().await } => match request {
                Some(request) => request,
                None => break,
            },
        };
        deliver(worker, &dispatcher, &request, &config, &cancel).await;
    }
    tracing::debug!(worker, "Fire queue worker stopped");
}

async fn deliver(
    worker: usize,
    dispatcher: &Dispatcher,
    request: &FireRequest,
    config: &QueueConfig,
    cancel: &CancellationToken,
) {
    let mut attempt = 1;
    loop {
        match dispatcher.fire(request).await {
            Ok(outcome) => {
                tracing::debug!(
                    worker,
                    trigger_id = request.trigger_id,
                    attempt,
                    new = outcome.is_new(),
                    "Queued firing delivered"
                );
                return;
            }
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = backoff(config.base_backoff, attempt);
                tracing::warn!(
                    worker,
                    trigger_id = request.trigger_id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Queued firing failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::warn!(
                            trigger_id = request.trigger_id,
                            "Abandoning retry on shutdown"
                        );
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(
                    worker,
                    trigger_id = request.trigger_id,
                    attempt,
                    error = %e,
                    "Queued firing failed permanently"
                );
                return;
            }
        }
    }
}
