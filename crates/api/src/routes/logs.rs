//! Route definitions for the `/logs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::logs;
use crate::state::AppState;

/// Routes mounted at `/logs`.
///
/// ```text
/// GET    /            -> list (?archived=&since=&last_hours=&filter_last_2_hours=&trigger_id=)
/// POST   /            -> create
/// POST   /retention   -> archive_old (?older_than_days=)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(logs::list).post(logs::create))
        .route("/retention", post(logs::archive_old))
}
