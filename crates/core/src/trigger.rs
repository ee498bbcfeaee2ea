//! Trigger type constants, firing reasons, the scheduled-trigger state
//! machine and idempotency keys.
//!
//! Everything here is pure logic: no database and no clock. Callers pass
//! `now` explicitly so the rules are deterministic under test.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Trigger type constants
// ---------------------------------------------------------------------------

/// Fires once at `schedule_time`, driven by the scheduler.
pub const TRIGGER_TYPE_SCHEDULED: &str = "scheduled";
/// Fired by an external API call.
pub const TRIGGER_TYPE_API: &str = "api";
/// Time-based rule evaluated by clients; never fired by the scheduler.
pub const TRIGGER_TYPE_TIME_BASED: &str = "time-based";

/// All valid trigger types.
pub const VALID_TRIGGER_TYPES: &[&str] = &[
    TRIGGER_TYPE_SCHEDULED,
    TRIGGER_TYPE_API,
    TRIGGER_TYPE_TIME_BASED,
];

// ---------------------------------------------------------------------------
// Event type constants
// ---------------------------------------------------------------------------

/// Written once when a trigger is created.
pub const EVENT_TRIGGER_CREATED: &str = "trigger_created";
/// Written by a manual test firing.
pub const EVENT_MANUAL_TEST: &str = "manual_test";
/// Written when the scheduler fires a due trigger.
pub const EVENT_SCHEDULED_FIRE: &str = "scheduled_fire";
/// Written when a trigger is fired through the API.
pub const EVENT_API_FIRE: &str = "api_fire";

/// Default width of the idempotency time bucket for manual and API fires.
pub const DEFAULT_FIRE_BUCKET_SECS: i64 = 1;

// ---------------------------------------------------------------------------
// TriggerType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    Scheduled,
    Api,
    TimeBased,
}

impl TriggerType {
    /// Return the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => TRIGGER_TYPE_SCHEDULED,
            Self::Api => TRIGGER_TYPE_API,
            Self::TimeBased => TRIGGER_TYPE_TIME_BASED,
        }
    }

    /// Parse from a string, returning an error for unknown types.
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            TRIGGER_TYPE_SCHEDULED => Ok(Self::Scheduled),
            TRIGGER_TYPE_API => Ok(Self::Api),
            TRIGGER_TYPE_TIME_BASED => Ok(Self::TimeBased),
            other => Err(CoreError::Validation(format!(
                "Unknown trigger_type '{other}'. Valid types: {}",
                VALID_TRIGGER_TYPES.join(", ")
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// FireReason
// ---------------------------------------------------------------------------

/// Why a trigger is being fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireReason {
    Manual,
    Scheduled,
    Api,
}

impl FireReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Api => "api",
        }
    }

    /// The event log type recorded for a firing with this reason.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Manual => EVENT_MANUAL_TEST,
            Self::Scheduled => EVENT_SCHEDULED_FIRE,
            Self::Api => EVENT_API_FIRE,
        }
    }
}

impl std::fmt::Display for FireReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Fire state machine
// ---------------------------------------------------------------------------

/// Lifecycle of a scheduled trigger.
///
/// ```text
/// PENDING --(schedule_time elapses)--> DUE --(dispatcher succeeds)--> FIRED
///    ^                                                                  |
///    +------------------(schedule_time updated: re-armed)---------------+
/// ```
///
/// Archival is orthogonal and tracked by the `archived` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireState {
    Pending,
    Due,
    Fired,
}

/// Derive the fire state of a trigger. Returns `None` for trigger types the
/// scheduler never fires.
pub fn fire_state(
    trigger_type: &str,
    schedule_time: Option<Timestamp>,
    fired_at: Option<Timestamp>,
    now: Timestamp,
) -> Option<FireState> {
    if trigger_type != TRIGGER_TYPE_SCHEDULED {
        return None;
    }
    if fired_at.is_some() {
        return Some(FireState::Fired);
    }
    match schedule_time {
        Some(at) if at <= now => Some(FireState::Due),
        Some(_) => Some(FireState::Pending),
        None => None,
    }
}

/// Whether a trigger must be re-armed (its FIRED marker cleared) after an
/// update changed its type or schedule.
pub fn needs_rearm(
    old_type: &str,
    old_schedule: Option<Timestamp>,
    new_type: &str,
    new_schedule: Option<Timestamp>,
) -> bool {
    new_type == TRIGGER_TYPE_SCHEDULED && (old_type != new_type || old_schedule != new_schedule)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a trigger definition as it would be persisted.
///
/// - `trigger_type` must be one of [`VALID_TRIGGER_TYPES`].
/// - A scheduled trigger requires `schedule_time`.
/// - `api_payload`, when present, must be a JSON object.
pub fn validate_definition(
    trigger_type: &str,
    schedule_time: Option<Timestamp>,
    api_payload: Option<&serde_json::Value>,
) -> Result<TriggerType, CoreError> {
    let parsed = TriggerType::parse(trigger_type)?;
    if parsed == TriggerType::Scheduled && schedule_time.is_none() {
        return Err(CoreError::Validation(
            "schedule_time is required for scheduled triggers".to_string(),
        ));
    }
    validate_payload("api_payload", api_payload)?;
    Ok(parsed)
}

/// Validate that an optional payload is a JSON object.
pub fn validate_payload(field: &str, payload: Option<&serde_json::Value>) -> Result<(), CoreError> {
    match payload {
        None | Some(serde_json::Value::Object(_)) => Ok(()),
        Some(_) => Err(CoreError::Validation(format!(
            "{field} must be a JSON object"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

/// Build the idempotency key for one firing attempt.
///
/// Scheduled fires are keyed on the exact scheduled instant so scheduler
/// retries collapse onto one log row. Manual and API fires are keyed on the
/// request instant floored to `bucket_secs`.
pub fn idempotency_key(
    trigger_id: DbId,
    reason: FireReason,
    instant: Timestamp,
    bucket_secs: i64,
) -> String {
    match reason {
        FireReason::Scheduled => {
            format!("{trigger_id}:{reason}:{}", instant.timestamp_micros())
        }
        FireReason::Manual | FireReason::Api => {
            let width = bucket_secs.max(1);
            let bucket = instant.timestamp().div_euclid(width) * width;
            format!("{trigger_id}:{reason}:{bucket}")
        }
    }
}
