use axum::extract::State;
use axum::Json;
use beacon_worker::retention::RetentionReport;
use chrono::Utc;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/retention/run
pub async fn run(State(state): State<AppState>) -> AppResult<Json<DataResponse<RetentionReport>>> {
    let report = state.retention.run_once(Utc::now()).await?;
    Ok(Json(DataResponse { data: report }))
}
