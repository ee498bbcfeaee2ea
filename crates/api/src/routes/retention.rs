use axum::routing::post;
use axum::Router;

use crate::handlers::retention;
use crate::state::AppState;

/// Routes mounted at `/retention`.
pub fn router() -> Router<AppState> {
    Router::new().route("/run", post(retention::run))
}
