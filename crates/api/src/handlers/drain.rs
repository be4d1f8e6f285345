//! Handler for drainer invocations (`POST /api/v1/drain`).

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use shutter_pipeline::DrainRequest;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Run one drain.
///
/// Deferrals (capacity, timeouts) still answer 200 with `success: true` so
/// schedulers do not retry; `outcome` and `resourceLimited` carry the
/// detail. Only a failure to claim answers 500.
pub async fn drain(State(state): State<AppState>, body: Bytes) -> AppResult<impl IntoResponse> {
    let request: DrainRequest = if body.iter().all(u8::is_ascii_whitespace) {
        DrainRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid drain request: {e}")))?
    };

    // Spawned so a request timeout does not abort in-flight work.
    let drainer = state.drainer.clone();
    let result = tokio::spawn(async move { drainer.drain(request).await })
        .await
        .map_err(|e| AppError::InternalError(format!("drain task failed: {e}")))?;

    match result {
        Ok(report) => Ok((
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": report.message(),
                "outcome": report.outcome,
                "resourceLimited": report.resource_limited,
                "timedOut": report.timed_out,
                "deadlineReached": report.deadline_reached,
                "data": report,
            })),
        )),
        Err(e) => {
            tracing::error!(error = %e, "Drain could not claim work");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": format!("Failed to claim pending downloads: {e}"),
                })),
            ))
        }
    }
}
