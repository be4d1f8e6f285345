pub mod downloads;
pub mod drain;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /downloads                        intake (POST), list by user (GET)
/// /downloads/{id}                   one request
/// /downloads/{id}/process           process a claimed request (POST)
///
/// /drain                            drainer invocation (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/downloads", downloads::router())
        .merge(drain::router())
}
