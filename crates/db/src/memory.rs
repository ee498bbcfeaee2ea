//! In-memory implementation of the store traits.
//!
//! Satisfies the same contract as [`crate::PgStore`]: every operation runs
//! under one write lock, so bulk archival and idempotent appends are atomic
//! with respect to concurrent callers. Used by tests and by local runs
//! without a database.
//!
//! Failure injection hooks ([`InMemoryStore::set_unavailable`] and
//! [`InMemoryStore::inject_conflicts`]) let callers exercise the transient
//! error paths of the engine.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use beacon_core::error::CoreError;
use beacon_core::retention;
use beacon_core::trigger::TRIGGER_TYPE_SCHEDULED;
use beacon_core::types::{DbId, Timestamp};
use chrono::Utc;
use tokio::sync::RwLock;

use crate::models::event_log::{EventLog, NewEventLog};
use crate::models::trigger::{CreateTrigger, Trigger, UpdateTrigger};
use crate::store::{AppendOutcome, EventLogStore, LogQuery, TriggerFilter, TriggerStore};

#[derive(Default)]
struct State {
    triggers: BTreeMap<DbId, Trigger>,
    logs: Vec<EventLog>,
    /// Idempotency key -> index into `logs`.
    log_keys: HashMap<String, usize>,
    last_trigger_id: DbId,
    last_log_id: DbId,
}

impl State {
    fn is_due(trigger: &Trigger) -> bool {
        trigger.trigger_type == TRIGGER_TYPE_SCHEDULED
            && !trigger.archived
            && trigger.fired_at.is_none()
            && trigger.schedule_time.is_some()
    }

    fn push_log(&mut self, entry: &NewEventLog, key: Option<&str>) -> EventLog {
        self.last_log_id += 1;
        let log = EventLog {
            id: self.last_log_id,
            trigger_id: entry.trigger_id,
            event_time: entry.event_time.unwrap_or_else(Utc::now),
            event_type: entry.event_type.clone(),
            payload: entry.payload.clone(),
            idempotency_key: key.map(str::to_string),
            archived: false,
        };
        if let Some(key) = key {
            self.log_keys.insert(key.to_string(), self.logs.len());
        }
        self.logs.push(log.clone());
        log
    }
}

/// Trigger and event log store held in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
    pending_conflicts: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StoreUnavailable` until
    /// cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` trigger updates fail their optimistic-lock check.
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Total number of log rows, archived or not.
    pub async fn log_count(&self) -> usize {
        self.state.read().await.logs.len()
    }

    fn check_available(&self) -> Result<(), CoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TriggerStore for InMemoryStore {
    async fn create(&self, input: &CreateTrigger) -> Result<Trigger, CoreError> {
        self.check_available()?;
        input.check()?;

        let mut state = self.state.write().await;
        state.last_trigger_id += 1;
        let now = Utc::now();
        let trigger = Trigger {
            id: state.last_trigger_id,
            name: input.name.clone(),
            trigger_type: input.trigger_type.clone(),
            schedule_time: input.schedule_time,
            api_payload: input.api_payload.clone(),
            fired_at: None,
            archived: false,
            archived_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        state.triggers.insert(trigger.id, trigger.clone());
        Ok(trigger)
    }

    async fn get(&self, id: DbId) -> Result<Trigger, CoreError> {
        self.check_available()?;
        self.state
            .read()
            .await
            .triggers
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound {
                entity: "Trigger",
                id,
            })
    }

    async fn update(&self, id: DbId, patch: &UpdateTrigger) -> Result<Trigger, CoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let current = state.triggers.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "Trigger",
            id,
        })?;
        let changes = patch.merge(current)?;
        if self.take_conflict() {
            return Err(CoreError::ConcurrentModification {
                entity: "Trigger",
                id,
            });
        }

        current.name = changes.name;
        current.trigger_type = changes.trigger_type;
        current.schedule_time = changes.schedule_time;
        current.api_payload = changes.api_payload;
        current.fired_at = changes.fired_at;
        current.version += 1;
        current.updated_at = Utc::now();
        Ok(current.clone())
    }

    async fn list(&self, filter: TriggerFilter) -> Result<Vec<Trigger>, CoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn archive(&self, id: DbId) -> Result<Trigger, CoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let trigger = state.triggers.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "Trigger",
            id,
        })?;
        if !trigger.archived {
            let now = Utc::now();
            trigger.archived = true;
            trigger.archived_at = Some(now);
            trigger.version += 1;
            trigger.updated_at = now;
        }
        Ok(trigger.clone())
    }

    async fn archive_older_than(
        &self,
        age: chrono::Duration,
        as_of: Timestamp,
    ) -> Result<u64, CoreError> {
        self.check_available()?;
        let cutoff = retention::cutoff(as_of, age);
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut count = 0;
        for trigger in state.triggers.values_mut() {
            if !trigger.archived && trigger.created_at < cutoff {
                trigger.archived = true;
                trigger.archived_at = Some(now);
                trigger.version += 1;
                trigger.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Trigger>, CoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut due: Vec<Trigger> = state
            .triggers
            .values()
            .filter(|t| State::is_due(t) && t.schedule_time.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.schedule_time, t.id));
        due.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn next_due_time(&self) -> Result<Option<Timestamp>, CoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .triggers
            .values()
            .filter(|t| State::is_due(t))
            .filter_map(|t| t.schedule_time)
            .min())
    }

    async fn mark_fired(
        &self,
        id: DbId,
        schedule_time: Timestamp,
        fired_at: Timestamp,
    ) -> Result<bool, CoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        match state.triggers.get_mut(&id) {
            Some(t) if t.fired_at.is_none() && t.schedule_time == Some(schedule_time) => {
                t.fired_at = Some(fired_at);
                t.version += 1;
                t.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), CoreError> {
        self.check_available()
    }
}

#[async_trait]
impl EventLogStore for InMemoryStore {
    async fn append(&self, entry: &NewEventLog) -> Result<EventLog, CoreError> {
        self.check_available()?;
        entry.check()?;
        Ok(self.state.write().await.push_log(entry, None))
    }

    async fn append_once(
        &self,
        entry: &NewEventLog,
        idempotency_key: &str,
    ) -> Result<AppendOutcome, CoreError> {
        self.check_available()?;
        entry.check()?;
        let mut state = self.state.write().await;
        if let Some(&index) = state.log_keys.get(idempotency_key) {
            return Ok(AppendOutcome::Existing(state.logs[index].clone()));
        }
        Ok(AppendOutcome::Inserted(
            state.push_log(entry, Some(idempotency_key)),
        ))
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<EventLog>, CoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut logs: Vec<EventLog> = state
            .logs
            .iter()
            .filter(|log| query.matches(log))
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.event_time, log.id));
        Ok(logs)
    }

    async fn archive_older_than(
        &self,
        age: chrono::Duration,
        as_of: Timestamp,
    ) -> Result<u64, CoreError> {
        self.check_available()?;
        let cutoff = retention::cutoff(as_of, age);
        let mut state = self.state.write().await;
        let mut count = 0;
        for log in state.logs.iter_mut() {
            if !log.archived && log.event_time < cutoff {
                log.archived = true;
                count += 1;
            }
        }
        Ok(count)
    }
}
