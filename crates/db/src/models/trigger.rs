//! Trigger entity model and DTOs.

use beacon_core::error::CoreError;
use beacon_core::trigger::{self, FireState, TRIGGER_TYPE_SCHEDULED};
use beacon_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::deserialize_some;

/// A row from the `triggers` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Trigger {
    pub id: DbId,
    pub name: String,
    pub trigger_type: String,
    pub schedule_time: Option<Timestamp>,
    pub api_payload: Option<serde_json::Value>,
    /// Set once a scheduled firing has been recorded.
    pub fired_at: Option<Timestamp>,
    pub archived: bool,
    pub archived_at: Option<Timestamp>,
    /// Optimistic-lock counter.
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Trigger {
    pub fn is_scheduled(&self) -> bool {
        self.trigger_type == TRIGGER_TYPE_SCHEDULED
    }

    /// Scheduler state of this trigger at `now`; `None` for non-scheduled types.
    pub fn fire_state(&self, now: Timestamp) -> Option<FireState> {
        trigger::fire_state(&self.trigger_type, self.schedule_time, self.fired_at, now)
    }
}

/// DTO for creating a new trigger.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTrigger {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub trigger_type: String,
    pub schedule_time: Option<Timestamp>,
    pub api_payload: Option<serde_json::Value>,
}

impl CreateTrigger {
    /// Field-level and cross-field validation. Runs before any write.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()?;
        trigger::validate_definition(
            &self.trigger_type,
            self.schedule_time,
            self.api_payload.as_ref(),
        )?;
        Ok(())
    }
}

/// DTO for a sparse trigger update.
///
/// Omitted fields are left untouched. For the nullable columns an explicit
/// `null` clears the value (`Some(None)`).
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTrigger {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub trigger_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub schedule_time: Option<Option<Timestamp>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub api_payload: Option<Option<serde_json::Value>>,
}

/// The full set of column values an update resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerChanges {
    pub name: String,
    pub trigger_type: String,
    pub schedule_time: Option<Timestamp>,
    pub api_payload: Option<serde_json::Value>,
    pub fired_at: Option<Timestamp>,
}

impl UpdateTrigger {
    /// Whether the patch touches the schedule (type or time).
    pub fn affects_schedule(&self) -> bool {
        self.trigger_type.is_some() || self.schedule_time.is_some()
    }

    /// Merge this patch over `current` and validate the merged definition.
    ///
    /// Changing the schedule of a scheduled trigger clears `fired_at` so the
    /// scheduler picks it up again.
    pub fn merge(&self, current: &Trigger) -> Result<TriggerChanges, CoreError> {
        self.validate()?;

        let name = self.name.clone().unwrap_or_else(|| current.name.clone());
        let trigger_type = self
            .trigger_type
            .clone()
            .unwrap_or_else(|| current.trigger_type.clone());
        let schedule_time = match self.schedule_time {
            Some(value) => value,
            None => current.schedule_time,
        };
        let api_payload = match &self.api_payload {
            Some(value) => value.clone(),
            None => current.api_payload.clone(),
        };

        trigger::validate_definition(&trigger_type, schedule_time, api_payload.as_ref())?;

        let fired_at = if trigger::needs_rearm(
            &current.trigger_type,
            current.schedule_time,
            &trigger_type,
            schedule_time,
        ) {
            None
        } else {
            current.fired_at
        };

        Ok(TriggerChanges {
            name,
            trigger_type,
            schedule_time,
            api_payload,
            fired_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::*;

    fn scheduled(at: Timestamp) -> Trigger {
        let now = Utc::now();
        Trigger {
            id: 1,
            name: "nightly".into(),
            trigger_type: "scheduled".into(),
            schedule_time: Some(at),
            api_payload: Some(json!({"k": "v"})),
            fired_at: Some(at),
            archived: false,
            archived_at: None,
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn create_requires_schedule_for_scheduled() {
        let input = CreateTrigger {
            name: "t".into(),
            trigger_type: "scheduled".into(),
            schedule_time: None,
            api_payload: None,
        };
        assert_matches!(input.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn create_rejects_empty_name() {
        let input = CreateTrigger {
            name: String::new(),
            trigger_type: "api".into(),
            schedule_time: None,
            api_payload: None,
        };
        assert_matches!(input.check(), Err(CoreError::Validation(m)) if m.contains("name"));
    }

    #[test]
    fn empty_patch_keeps_everything() {
        let current = scheduled(Utc::now());
        let changes = UpdateTrigger::default().merge(&current).unwrap();
        assert_eq!(changes.name, current.name);
        assert_eq!(changes.schedule_time, current.schedule_time);
        assert_eq!(changes.api_payload, current.api_payload);
        assert_eq!(changes.fired_at, current.fired_at);
    }

    #[test]
    fn new_schedule_rearms() {
        let current = scheduled(Utc::now());
        let patch = UpdateTrigger {
            schedule_time: Some(Some(Utc::now() + Duration::hours(1))),
            ..Default::default()
        };
        let changes = patch.merge(&current).unwrap();
        assert!(changes.fired_at.is_none());
    }

    #[test]
    fn clearing_schedule_of_scheduled_trigger_is_invalid() {
        let current = scheduled(Utc::now());
        let patch = UpdateTrigger {
            schedule_time: Some(None),
            ..Default::default()
        };
        assert_matches!(patch.merge(&current), Err(CoreError::Validation(_)));
    }

    #[test]
    fn explicit_null_clears_payload() {
        let current = scheduled(Utc::now());
        let patch: UpdateTrigger = serde_json::from_value(json!({"api_payload": null})).unwrap();
        assert_eq!(patch.api_payload, Some(None));
        let changes = patch.merge(&current).unwrap();
        assert!(changes.api_payload.is_none());
    }

    #[test]
    fn omitted_fields_deserialize_as_none() {
        let patch: UpdateTrigger = serde_json::from_value(json!({"name": "renamed"})).unwrap();
        assert_eq!(patch.name.as_deref(), Some("renamed"));
        assert!(patch.schedule_time.is_none());
        assert!(patch.api_payload.is_none());
        assert!(!patch.affects_schedule());
    }

    #[test]
    fn invalid_type_in_patch_is_rejected() {
        let current = scheduled(Utc::now());
        let patch = UpdateTrigger {
            trigger_type: Some("cron".into()),
            ..Default::default()
        };
        assert_matches!(patch.merge(&current), Err(CoreError::Validation(_)));
    }
}
