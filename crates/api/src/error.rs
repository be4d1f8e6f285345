use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use shutter_core::error::CoreError;
use shutter_pipeline::dispatch::RESOURCE_EXHAUSTED_STATUS;
use shutter_pipeline::error::LedgerError;
use shutter_pipeline::PipelineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and the pipeline's errors, and
/// adds HTTP-specific variants. Implements [`IntoResponse`] to produce
/// consistent `{ "error", "code" }` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

/// Status returned when processing capacity is exhausted.
pub fn resource_exhausted_status() -> StatusCode {
    StatusCode::from_u16(RESOURCE_EXHAUSTED_STATUS).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            // --- Pipeline errors ---
            AppError::Pipeline(err) => match err {
                PipelineError::ResourceExhausted => (
                    resource_exhausted_status(),
                    "RESOURCE_EXHAUSTED",
                    err.to_string(),
                ),
                PipelineError::NotClaimed { .. } | PipelineError::ClaimLost { .. } => {
                    (StatusCode::CONFLICT, "CLAIM_CONFLICT", err.to_string())
                }
                PipelineError::ProcessingTimeout { .. } => {
                    (StatusCode::GATEWAY_TIMEOUT, "PROCESSING_TIMEOUT", err.to_string())
                }
                PipelineError::DispatchTimeout => {
                    (StatusCode::GATEWAY_TIMEOUT, "DISPATCH_TIMEOUT", err.to_string())
                }
                PipelineError::Dispatch(msg) => {
                    tracing::error!(error = %msg, "Dispatch error");
                    (StatusCode::BAD_GATEWAY, "DISPATCH_ERROR", err.to_string())
                }
                PipelineError::Ledger(ledger) => {
                    tracing::error!(error = %ledger, "Ledger error");
                    internal()
                }
            },

            // --- Ledger errors ---
            AppError::Ledger(err) => {
                tracing::error!(error = %err, "Ledger error");
                internal()
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhaustion_maps_to_546() {
        let response = AppError::Pipeline(PipelineError::ResourceExhausted).into_response();
        assert_eq!(response.status().as_u16(), 546);
    }

    #[test]
    fn validation_maps_to_400() {
        let response = AppError::Core(CoreError::Validation("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn processing_deadline_maps_to_504() {
        let response = AppError::Pipeline(PipelineError::ProcessingTimeout {
            request_id: uuid::Uuid::nil(),
            budget: std::time::Duration::from_secs(120),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn stale_claim_maps_to_409() {
        let response = AppError::Pipeline(PipelineError::NotClaimed {
            request_id: uuid::Uuid::nil(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
