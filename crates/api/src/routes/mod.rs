pub mod health;
pub mod logs;
pub mod retention;
pub mod triggers;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /triggers          trigger CRUD, archival and firing
/// /logs              event log queries, appends and log retention
/// /retention/run     one Retention Manager pass
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/triggers", triggers::router())
        .nest("/logs", logs::router())
        .nest("/retention", retention::router())
}
