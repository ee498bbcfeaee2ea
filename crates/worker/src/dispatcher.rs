//! Trigger firing.
//!
//! [`Dispatcher::fire`] produces exactly one event log entry per firing. The
//! idempotency key is checked and inserted in one atomic store operation
//! ([`EventLogStore::append_once`]), so re-invocations from the scheduler,
//! the fire queue or a retried HTTP request collapse onto the first row.

use std::sync::Arc;

use beacon_core::error::CoreError;
use beacon_core::trigger::{idempotency_key, FireReason};
use beacon_core::types::{DbId, Timestamp};
use beacon_db::models::event_log::{EventLog, NewEventLog};
use beacon_db::models::trigger::Trigger;
use beacon_db::{AppendOutcome, EventLogStore, TriggerStore};
use beacon_events::{names, EventBus, PlatformEvent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A request to fire one trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireRequest {
    pub trigger_id: DbId,
    pub reason: FireReason,
    /// The instant the firing is keyed on: the request time for manual and
    /// api firings. Ignored for scheduled firings, which key on the
    /// trigger's `schedule_time`.
    pub instant: Timestamp,
    /// Payload override for api firings.
    pub payload: Option<serde_json::Value>,
}

impl FireRequest {
    pub fn manual(trigger_id: DbId, instant: Timestamp) -> Self {
        Self {
            trigger_id,
            reason: FireReason::Manual,
            instant,
            payload: None,
        }
    }

    pub fn api(trigger_id: DbId, instant: Timestamp, payload: Option<serde_json::Value>) -> Self {
        Self {
            trigger_id,
            reason: FireReason::Api,
            instant,
            payload,
        }
    }

    pub fn scheduled(trigger_id: DbId, schedule_time: Timestamp) -> Self {
        Self {
            trigger_id,
            reason: FireReason::Scheduled,
            instant: schedule_time,
            payload: None,
        }
    }
}

/// Result of a successful [`Dispatcher::fire`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome {
    /// A new event log entry was written.
    Fired(EventLog),
    /// This firing was already recorded; the existing entry is returned.
    AlreadyFired(EventLog),
}

impl FireOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::Fired(_))
    }

    pub fn log(&self) -> &EventLog {
        match self {
            Self::Fired(log) | Self::AlreadyFired(log) => log,
        }
    }

    pub fn into_log(self) -> EventLog {
        match self {
            Self::Fired(log) | Self::AlreadyFired(log) => log,
        }
    }
}

pub struct Dispatcher {
    triggers: Arc<dyn TriggerStore>,
    logs: Arc<dyn EventLogStore>,
    bus: Arc<EventBus>,
    fire_bucket_secs: i64,
}

impl Dispatcher {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        logs: Arc<dyn EventLogStore>,
        bus: Arc<EventBus>,
        fire_bucket_secs: i64,
    ) -> Self {
        Self {
            triggers,
            logs,
            bus,
            fire_bucket_secs,
        }
    }

    /// Fire a trigger.
    ///
    /// Errors:
    /// - `NotFound` for an unknown trigger.
    /// - `Validation` for a scheduled firing of a non-scheduled trigger.
    /// - `Conflict` when the trigger is archived and this firing was never
    ///   recorded.
    /// - `StoreUnavailable` when the store could not be reached.
    pub async fn fire(&self, request: &FireRequest) -> Result<FireOutcome, CoreError> {
        let trigger = self.triggers.get(request.trigger_id).await?;
        match request.reason {
            FireReason::Scheduled => self.fire_scheduled(&trigger).await,
            FireReason::Manual | FireReason::Api => self.fire_on_demand(&trigger, request).await,
        }
    }

    async fn fire_scheduled(&self, trigger: &Trigger) -> Result<FireOutcome, CoreError> {
        if !trigger.is_scheduled() {
            return Err(CoreError::Validation(format!(
                "trigger {} is of type '{}', not scheduled",
                trigger.id, trigger.trigger_type
            )));
        }
        let schedule_time = trigger.schedule_time.ok_or_else(|| {
            CoreError::Validation(format!("trigger {} has no schedule_time", trigger.id))
        })?;
        // A fired trigger always has its log row, so only an archived trigger
        // that never fired is refused here.
        if trigger.archived && trigger.fired_at.is_none() {
            return Err(archived_conflict(trigger.id));
        }

        let key = idempotency_key(trigger.id, FireReason::Scheduled, schedule_time, 1);
        let entry = NewEventLog::new(trigger.id, FireReason::Scheduled.event_type())
            .with_payload(Some(json!({
                "schedule_time": schedule_time,
                "api_payload": trigger.api_payload,
            })))
            .at(Utc::now());
        let outcome = self.logs.append_once(&entry, &key).await?;

        // Also runs for an existing row, in case an earlier attempt appended
        // but failed before setting the marker.
        let marked = self
            .triggers
            .mark_fired(trigger.id, schedule_time, outcome_time(&outcome))
            .await?;
        tracing::debug!(trigger_id = trigger.id, marked, "Scheduled fire marker");

        Ok(self.finish(trigger.id, FireReason::Scheduled, outcome))
    }

    async fn fire_on_demand(
        &self,
        trigger: &Trigger,
        request: &FireRequest,
    ) -> Result<FireOutcome, CoreError> {
        if trigger.archived {
            return Err(archived_conflict(trigger.id));
        }

        let payload = match request.reason {
            FireReason::Api => request
                .payload
                .clone()
                .or_else(|| trigger.api_payload.clone()),
            _ => trigger.api_payload.clone(),
        };
        let key = idempotency_key(
            trigger.id,
            request.reason,
            request.instant,
            self.fire_bucket_secs,
        );
        let entry = NewEventLog::new(trigger.id, request.reason.event_type())
            .with_payload(payload)
            .at(request.instant);
        let outcome = self.logs.append_once(&entry, &key).await?;

        Ok(self.finish(trigger.id, request.reason, outcome))
    }

    fn finish(&self, trigger_id: DbId, reason: FireReason, outcome: AppendOutcome) -> FireOutcome {
        match outcome {
            AppendOutcome::Inserted(log) => {
                tracing::info!(trigger_id, %reason, log_id = log.id, "Trigger fired");
                self.bus.publish(
                    PlatformEvent::new(names::TRIGGER_FIRED)
                        .for_trigger(trigger_id)
                        .with_payload(json!({
                            "reason": reason,
                            "event_type": log.event_type,
                            "log_id": log.id,
                        })),
                );
                FireOutcome::Fired(log)
            }
            AppendOutcome::Existing(log) => {
                tracing::debug!(trigger_id, %reason, log_id = log.id, "Firing already recorded");
                FireOutcome::AlreadyFired(log)
            }
        }
    }
}

fn archived_conflict(id: DbId) -> CoreError {
    CoreError::Conflict(format!("trigger {id} is archived"))
}

fn outcome_time(outcome: &AppendOutcome) -> Timestamp {
    match outcome {
        AppendOutcome::Inserted(log) | AppendOutcome::Existing(log) => log.event_time,
    }
}
