use axum::routing::post;
use axum::Router;

use crate::handlers::drain;
use crate::state::AppState;

/// `POST /drain -> drain`
pub fn router() -> Router<AppState> {
    Router::new().route("/drain", post(drain::drain))
}
