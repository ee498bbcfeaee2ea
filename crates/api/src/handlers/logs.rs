//! Handlers for the `/logs` resource.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use beacon_core::retention::DEFAULT_LOG_RETENTION_DAYS;
use beacon_db::models::event_log::{EventLog, NewEventLog};
use chrono::Utc;

use crate::error::AppResult;
use crate::query::{LogQueryParams, OlderThanParams};
use crate::response::{ArchivedCount, DataResponse};
use crate::state::AppState;

/// GET /api/v1/logs
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<LogQueryParams>,
) -> AppResult<Json<DataResponse<Vec<EventLog>>>> {
    let query = params.into_query(Utc::now())?;
    let logs = state.logs.query(&query).await?;
    Ok(Json(DataResponse { data: logs }))
}

/// POST /api/v1/logs
pub async fn create(
    State(state): State<AppState>,
    Json(entry): Json<NewEventLog>,
) -> AppResult<(StatusCode, Json<DataResponse<EventLog>>)> {
    let log = state.logs.append(&entry).await?;
    tracing::debug!(log_id = log.id, trigger_id = log.trigger_id, "Log entry appended");
    Ok((StatusCode::CREATED, Json(DataResponse { data: log })))
}

/// POST /api/v1/logs/retention?older_than_days=
pub async fn archive_old(
    State(state): State<AppState>,
    Query(params): Query<OlderThanParams>,
) -> AppResult<Json<DataResponse<ArchivedCount>>> {
    let age = params.age(DEFAULT_LOG_RETENTION_DAYS)?;
    let archived = state.logs.archive_older_than(age, Utc::now()).await?;
    tracing::info!(count = archived, older_than_days = age.num_days(), "Bulk-archived logs");
    Ok(Json(DataResponse {
        data: ArchivedCount { archived },
    }))
}
