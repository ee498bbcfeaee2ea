//! Handlers for the `/triggers` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_core::error::CoreError;
use beacon_core::retention::DEFAULT_TRIGGER_RETENTION_DAYS;
use beacon_core::types::{DbId, Timestamp};
use beacon_db::models::event_log::EventLog;
use beacon_db::models::trigger::{CreateTrigger, UpdateTrigger};
use beacon_db::TriggerFilter;
use beacon_worker::{FireOutcome, FireRequest};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::query::{OlderThanParams, TriggerListParams};
use crate::response::{ArchivedCount, DataResponse, TriggerResponse};
use crate::state::AppState;

/// Body of `POST /triggers/{id}/invoke`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InvokeRequest {
    /// Replaces the trigger's stored `api_payload` for this firing.
    pub payload: Option<serde_json::Value>,
    /// Earliest execution time; a future value queues the firing.
    pub not_before: Option<Timestamp>,
}

/// Acknowledgement for a queued invocation.
#[derive(Debug, Serialize)]
pub struct QueuedFire {
    pub trigger_id: DbId,
    pub not_before: Timestamp,
}

/// POST /api/v1/triggers
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateTrigger>,
) -> AppResult<(StatusCode, Json<DataResponse<TriggerResponse>>)> {
    let trigger = state.triggers.create(&input).await?;
    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: TriggerResponse::at(trigger, Utc::now()),
        }),
    ))
}

/// GET /api/v1/triggers?status=
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<TriggerListParams>,
) -> AppResult<Json<DataResponse<Vec<TriggerResponse>>>> {
    let triggers = state.triggers.list(params.status).await?;
    Ok(Json(DataResponse {
        data: TriggerResponse::list(triggers, Utc::now()),
    }))
}

/// GET /api/v1/triggers/archived
pub async fn list_archived(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<Vec<TriggerResponse>>>> {
    let triggers = state.triggers.list(TriggerFilter::Archived).await?;
    Ok(Json(DataResponse {
        data: TriggerResponse::list(triggers, Utc::now()),
    }))
}

/// GET /api/v1/triggers/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<TriggerResponse>>> {
    let trigger = state.triggers.get(id).await?;
    Ok(Json(DataResponse {
        data: TriggerResponse::at(trigger, Utc::now()),
    }))
}

/// PUT|PATCH /api/v1/triggers/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(patch): Json<UpdateTrigger>,
) -> AppResult<Json<DataResponse<TriggerResponse>>> {
    let trigger = state.triggers.update(id, &patch).await?;
    Ok(Json(DataResponse {
        data: TriggerResponse::at(trigger, Utc::now()),
    }))
}

/// POST /api/v1/triggers/{id}/archive
pub async fn archive(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<TriggerResponse>>> {
    let trigger = state.triggers.archive(id).await?;
    Ok(Json(DataResponse {
        data: TriggerResponse::at(trigger, Utc::now()),
    }))
}

/// POST /api/v1/triggers/archive-old?older_than_days=
pub async fn archive_old(
    State(state): State<AppState>,
    Query(params): Query<OlderThanParams>,
) -> AppResult<Json<DataResponse<ArchivedCount>>> {
    let age = params.age(DEFAULT_TRIGGER_RETENTION_DAYS)?;
    let archived = state.triggers.archive_older_than(age, Utc::now()).await?;
    Ok(Json(DataResponse {
        data: ArchivedCount { archived },
    }))
}

/// POST /api/v1/triggers/{id}/test
///
/// Fires the trigger with its stored payload. A repeat within the same
/// idempotency bucket returns the existing entry with 200.
pub async fn test_fire(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<(StatusCode, Json<DataResponse<EventLog>>)> {
    let outcome = state
        .dispatcher
        .fire(&FireRequest::manual(id, Utc::now()))
        .await?;
    Ok(fired(outcome))
}

/// POST /api/v1/triggers/{id}/invoke
///
/// Without a future `not_before` the trigger fires inline (201 / 200).
/// Otherwise the firing is queued and 202 is returned.
pub async fn invoke(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(body): Json<InvokeRequest>,
) -> AppResult<Response> {
    let now = Utc::now();
    let deferred = body.not_before.filter(|at| *at > now);

    let Some(not_before) = deferred else {
        let outcome = state
            .dispatcher
            .fire(&FireRequest::api(id, now, body.payload))
            .await?;
        return Ok(fired(outcome).into_response());
    };

    // Reject unknown or archived triggers now rather than in the worker.
    let trigger = state.triggers.get(id).await?;
    if trigger.archived {
        return Err(CoreError::Conflict(format!("trigger {id} is archived")).into());
    }

    state
        .queue
        .enqueue(
            FireRequest::api(id, not_before, body.payload),
            Some(not_before),
        )
        .await?;
    tracing::info!(trigger_id = id, %not_before, "Invocation queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: QueuedFire {
                trigger_id: id,
                not_before,
            },
        }),
    )
        .into_response())
}

fn fired(outcome: FireOutcome) -> (StatusCode, Json<DataResponse<EventLog>>) {
    let status = if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(DataResponse {
            data: outcome.into_log(),
        }),
    )
}
