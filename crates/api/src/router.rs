//! Application router.
//!
//! [`build_app_router`] is shared by `main.rs` and the integration tests so
//! both exercise the same routes and middleware.

use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::ServerConfig;
use crate::routes;
use crate::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Routes:
///
/// ```text
/// /health          liveness and ledger health
/// /api/v1/...      see routes::api_routes
/// /files/...       archives, only with the local object store
/// ```
///
/// Every request gets an `x-request-id` (generated unless supplied), is
/// traced at INFO, bounded by `request_timeout_secs` and shielded from
/// handler panics.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let mut router = Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes());

    if let Some(root) = &state.files_root {
        tracing::info!(root = %root.display(), "Serving local archives under /files");
        router = router.nest_service("/files", ServeDir::new(root));
    }

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(CatchPanicLayer::new());

    // CORS is applied as a separate, outermost layer: `Router::layer` converts
    // the inner response body to `axum::body::Body`, which satisfies the
    // `Default` bound `Cors` places on its inner service's body.
    router
        .layer(middleware)
        .layer(build_cors_layer(config))
        .with_state(state)
}

/// CORS for the browsing client: GET and POST with JSON bodies.
///
/// Origins that do not parse as header values are logged and skipped.
pub fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(3600))
}
