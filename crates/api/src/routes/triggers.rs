//! Route definitions for the `/triggers` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::triggers;
use crate::state::AppState;

/// Routes mounted at `/triggers`.
///
/// ```text
/// GET    /                 -> list (?status=active|archived|all)
/// POST   /                 -> create
/// GET    /archived         -> list_archived
/// POST   /archive-old      -> archive_old (?older_than_days=)
/// GET    /{id}             -> get_by_id
/// PUT    /{id}             -> update
/// PATCH  /{id}             -> update
/// POST   /{id}/archive     -> archive
/// POST   /{id}/test        -> test_fire
/// POST   /{id}/invoke      -> invoke
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(triggers::list).post(triggers::create))
        .route("/archived", get(triggers::list_archived))
        .route("/archive-old", post(triggers::archive_old))
        .route(
            "/{id}",
            get(triggers::get_by_id)
                .put(triggers::update)
                .patch(triggers::update),
        )
        .route("/{id}/archive", post(triggers::archive))
        .route("/{id}/test", post(triggers::test_fire))
        .route("/{id}/invoke", post(triggers::invoke))
}
