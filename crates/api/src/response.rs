//! Shared response envelope types for API handlers.
//!
//! All API responses use a `{ "data": ... }` envelope.

use beacon_core::trigger::FireState;
use beacon_core::types::Timestamp;
use beacon_db::models::trigger::Trigger;
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
///
/// ```ignore
/// Ok(Json(DataResponse { data: trigger }))
/// ```
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Count of rows affected by a bulk operation.
#[derive(Debug, Serialize)]
pub struct ArchivedCount {
    pub archived: u64,
}

/// A trigger together with its derived scheduler state.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    #[serde(flatten)]
    pub trigger: Trigger,
    /// Omitted for trigger types the scheduler never fires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fire_state: Option<FireState>,
}

impl TriggerResponse {
    pub fn at(trigger: Trigger, now: Timestamp) -> Self {
        let fire_state = trigger.fire_state(now);
        Self {
            trigger,
            fire_state,
        }
    }

    pub fn list(triggers: Vec<Trigger>, now: Timestamp) -> Vec<Self> {
        triggers
            .into_iter()
            .map(|trigger| Self::at(trigger, now))
            .collect()
    }
}
