//! Trigger lifecycle orchestration.
//!
//! Store mutations plus their side effects: the `trigger_created` log entry
//! and the platform events the scheduler listens to.

use std::sync::Arc;

use beacon_core::error::CoreError;
use beacon_core::retry::retry_once_on_conflict;
use beacon_core::trigger::EVENT_TRIGGER_CREATED;
use beacon_core::types::{DbId, Timestamp};
use beacon_db::models::event_log::NewEventLog;
use beacon_db::models::trigger::{CreateTrigger, Trigger, UpdateTrigger};
use beacon_db::{EventLogStore, TriggerFilter, TriggerStore};
use beacon_events::{names, EventBus, PlatformEvent};
use serde_json::json;

pub struct TriggerService {
    triggers: Arc<dyn TriggerStore>,
    logs: Arc<dyn EventLogStore>,
    bus: Arc<EventBus>,
}

impl TriggerService {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        logs: Arc<dyn EventLogStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            triggers,
            logs,
            bus,
        }
    }

    /// Create a trigger and record its `trigger_created` log entry.
    ///
    /// The trigger is committed before the log entry is written; a failed
    /// log append is reported but does not fail the creation.
    pub async fn create(&self, input: &CreateTrigger) -> Result<Trigger, CoreError> {
        let trigger = self.triggers.create(input).await?;
        tracing::info!(
            trigger_id = trigger.id,
            trigger_type = %trigger.trigger_type,
            "Trigger created"
        );

        let entry = NewEventLog::new(trigger.id, EVENT_TRIGGER_CREATED).with_payload(Some(
            json!({ "message": format!("Trigger '{}' created", trigger.name) }),
        ));
        if let Err(e) = self.logs.append(&entry).await {
            tracing::error!(trigger_id = trigger.id, error = %e, "Failed to log trigger creation");
        }

        self.publish(names::TRIGGER_CREATED, &trigger);
        Ok(trigger)
    }

    pub async fn get(&self, id: DbId) -> Result<Trigger, CoreError> {
        self.triggers.get(id).await
    }

    pub async fn list(&self, filter: TriggerFilter) -> Result<Vec<Trigger>, CoreError> {
        self.triggers.list(filter).await
    }

    /// Apply a sparse update, retrying once on an optimistic-lock conflict.
    pub async fn update(&self, id: DbId, patch: &UpdateTrigger) -> Result<Trigger, CoreError> {
        let trigger = retry_once_on_conflict(|| self.triggers.update(id, patch)).await?;
        tracing::info!(
            trigger_id = id,
            version = trigger.version,
            rescheduled = patch.affects_schedule(),
            "Trigger updated"
        );
        self.publish(names::TRIGGER_UPDATED, &trigger);
        Ok(trigger)
    }

    /// Archive a trigger. Already-archived triggers are returned unchanged.
    pub async fn archive(&self, id: DbId) -> Result<Trigger, CoreError> {
        let before = self.triggers.get(id).await?;
        let trigger = self.triggers.archive(id).await?;
        if !before.archived {
            tracing::info!(trigger_id = id, "Trigger archived");
            self.publish(names::TRIGGER_ARCHIVED, &trigger);
        }
        Ok(trigger)
    }

    /// Archive every active trigger created more than `age` before `as_of`.
    pub async fn archive_older_than(
        &self,
        age: chrono::Duration,
        as_of: Timestamp,
    ) -> Result<u64, CoreError> {
        let count = self.triggers.archive_older_than(age, as_of).await?;
        tracing::info!(count, older_than_days = age.num_days(), "Bulk-archived triggers");
        Ok(count)
    }

    fn publish(&self, event_type: &str, trigger: &Trigger) {
        self.bus.publish(
            PlatformEvent::new(event_type)
                .for_trigger(trigger.id)
                .with_payload(json!({
                    "trigger_type": trigger.trigger_type,
                    "schedule_time": trigger.schedule_time,
                    "archived": trigger.archived,
                })),
        );
    }
}
