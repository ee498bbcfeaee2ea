//! Scheduled trigger sweep.
//!
//! The due queue lives in the store (`list_due` / `next_due_time`), so a
//! restart resumes exactly where the previous process stopped. Between
//! sweeps the loop sleeps until the earliest pending `schedule_time`, capped
//! at the poll interval, and wakes early when a scheduled trigger is created
//! or rescheduled. After a failed sweep the loop waits a full poll interval,
//! and a trigger that failed is parked for one interval so it cannot hold
//! the head of the due queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::error::CoreError;
use beacon_core::trigger::TRIGGER_TYPE_SCHEDULED;
use beacon_core::types::{DbId, Timestamp};
use beacon_db::TriggerStore;
use beacon_events::{names, PlatformEvent};
use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Dispatcher, FireOutcome, FireRequest};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub fired: usize,
    pub already_fired: usize,
    pub skipped: usize,
}

impl SweepReport {
    pub fn attempted(&self) -> usize {
        self.fired + self.already_fired + self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.attempted() == 0
    }
}

pub struct Scheduler {
    triggers: Arc<dyn TriggerStore>,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
    batch_size: i64,
    /// Triggers that failed to fire, mapped to when they may be retried.
    parked: Mutex<HashMap<DbId, Timestamp>>,
}

impl Scheduler {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        dispatcher: Arc<Dispatcher>,
        poll_interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            triggers,
            dispatcher,
            poll_interval,
            batch_size,
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatch up to `batch_size` triggers due at `now`, oldest first.
    ///
    /// A transient store failure aborts the batch; the remaining triggers
    /// stay due and are picked up by the next sweep. Other per-trigger
    /// failures are logged, skipped, and the trigger is parked for one poll
    /// interval so the triggers behind it still get their turn.
    pub async fn sweep(&self, now: Timestamp) -> Result<SweepReport, CoreError> {
        let mut parked = self.parked.lock().await;
        parked.retain(|_, retry_at| *retry_at > now);

        let limit = self.batch_size + parked.len() as i64;
        let due = self.triggers.list_due(now, limit).await?;
        let mut report = SweepReport::default();
        let mut attempted = 0;

        for trigger in due {
            if parked.contains_key(&trigger.id) {
                continue;
            }
            if attempted == self.batch_size {
                break;
            }
            let Some(schedule_time) = trigger.schedule_time else {
                continue;
            };
            attempted += 1;
            match self
                .dispatcher
                .fire(&FireRequest::scheduled(trigger.id, schedule_time))
                .await
            {
                Ok(FireOutcome::Fired(_)) => report.fired += 1,
                Ok(FireOutcome::AlreadyFired(_)) => report.already_fired += 1,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::warn!(trigger_id = trigger.id, error = %e, "Skipping due trigger");
                    parked.insert(trigger.id, now + self.park_for());
                    report.skipped += 1;
                }
            }
        }
        Ok(report)
    }

    fn park_for(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.poll_interval).unwrap_or(chrono::Duration::zero())
    }

    /// How long to sleep before the next sweep.
    ///
    /// A trigger that is still due after a sweep may be parked; the delay
    /// then runs until the earliest parked trigger may be retried.
    pub async fn next_delay(&self, now: Timestamp) -> Duration {
        let until_due = match self.triggers.next_due_time().await {
            Ok(Some(next)) => (next - now)
                .to_std()
                .map(|until| until.min(self.poll_interval))
                .unwrap_or(Duration::ZERO),
            Ok(None) => self.poll_interval,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read next due time");
                self.poll_interval
            }
        };
        if !until_due.is_zero() {
            return until_due;
        }
        match self.parked.lock().await.values().min() {
            Some(retry_at) => (*retry_at - now)
                .to_std()
                .map(|until| until.min(self.poll_interval))
                .unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }

    /// Run sweeps until `cancel` fires.
    ///
    /// Cancellation is only observed between sweeps, so a batch in progress
    /// always completes.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut events: broadcast::Receiver<PlatformEvent>,
    ) {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Scheduler started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let now = Utc::now();
            let delay = match self.sweep(now).await {
                Ok(report) if report.skipped > 0 => {
                    tracing::info!(
                        fired = report.fired,
                        already_fired = report.already_fired,
                        skipped = report.skipped,
                        "Scheduler sweep completed with failures"
                    );
                    self.poll_interval
                }
                Ok(report) => {
                    if !report.is_empty() {
                        tracing::info!(
                            fired = report.fired,
                            already_fired = report.already_fired,
                            "Scheduler sweep completed"
                        );
                    }
                    if report.attempted() as i64 >= self.batch_size {
                        // A full batch; more may be waiting.
                        Duration::ZERO
                    } else {
                        self.next_delay(Utc::now()).await
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Scheduler sweep failed, retrying next cycle");
                    self.poll_interval
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_wake(&mut events) => {
                    tracing::debug!("Scheduler woken by trigger change");
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

/// Whether an event may have moved the earliest due time.
fn wakes_scheduler(event: &PlatformEvent) -> bool {
    (event.event_type == names::TRIGGER_CREATED || event.event_type == names::TRIGGER_UPDATED)
        && event.payload_str("trigger_type") == Some(TRIGGER_TYPE_SCHEDULED)
}

/// Resolve on the next relevant event. A lagged receiver may have missed
/// one, so it resolves too. A closed bus never resolves.
async fn wait_for_wake(events: &mut broadcast::Receiver<PlatformEvent>) {
    loop {
        match events.recv().await {
            Ok(event) if wakes_scheduler(&event) => return,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Scheduler event receiver lagged");
                return;
            }
            Err(RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
