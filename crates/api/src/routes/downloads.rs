//! Route definitions for bulk downloads.
//!
//! Mounted at `/downloads` by `api_routes()`.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::downloads;
use crate::state::AppState;

/// ```text
/// GET    /                  -> list_downloads
/// POST   /                  -> create_download
/// GET    /{id}              -> get_download
/// POST   /{id}/process      -> process_download
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(downloads::list_downloads).post(downloads::create_download))
        .route("/{id}", get(downloads::get_download))
        .route("/{id}/process", post(downloads::process_download))
}
