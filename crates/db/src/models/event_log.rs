//! Event log entity model and DTOs.

use beacon_core::error::CoreError;
use beacon_core::trigger;
use beacon_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `event_logs` table.
///
/// `trigger_id` is a weak reference; the trigger may be archived or missing.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct EventLog {
    pub id: DbId,
    pub trigger_id: DbId,
    pub event_time: Timestamp,
    pub event_type: String,
    pub payload: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
    pub archived: bool,
}

/// DTO for appending an event log entry.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewEventLog {
    pub trigger_id: DbId,
    #[validate(length(min = 1, max = 64))]
    pub event_type: String,
    pub payload: Option<serde_json::Value>,
    /// Defaults to the time of the append.
    pub event_time: Option<Timestamp>,
}

impl NewEventLog {
    pub fn new(trigger_id: DbId, event_type: impl Into<String>) -> Self {
        Self {
            trigger_id,
            event_type: event_type.into(),
            payload: None,
            event_time: None,
        }
    }

    pub fn with_payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn at(mut self, event_time: Timestamp) -> Self {
        self.event_time = Some(event_time);
        self
    }

    /// Validate before any write.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()?;
        trigger::validate_payload("payload", self.payload.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_sets_fields() {
        let entry = NewEventLog::new(4, "manual_test").with_payload(Some(json!({"a": 1})));
        assert_eq!(entry.trigger_id, 4);
        assert_eq!(entry.event_type, "manual_test");
        assert!(entry.event_time.is_none());
        assert!(entry.check().is_ok());
    }

    #[test]
    fn scalar_payload_is_rejected() {
        let entry = NewEventLog::new(4, "manual_test").with_payload(Some(json!(12)));
        assert_matches!(entry.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn empty_event_type_is_rejected() {
        let entry = NewEventLog::new(4, "");
        assert_matches!(entry.check(), Err(CoreError::Validation(_)));
    }
}
