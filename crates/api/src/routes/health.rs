use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// `postgres` or `memory`.
    pub ledger_backend: &'static str,
    /// Whether the ledger is reachable.
    pub ledger_healthy: bool,
    /// Object store backend name.
    pub storage_backend: &'static str,
    /// Free processing slots in this process.
    pub available_slots: usize,
}

/// GET /health -- returns service and ledger health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ledger_healthy = state.ledger.health_check().await.is_ok();

    let status = if ledger_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        ledger_backend: state.ledger.backend(),
        ledger_healthy,
        storage_backend: state.processor.store().backend(),
        available_slots: state.processor.available_permits(),
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
