//! Handlers for bulk-download intake, polling and processing.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use shutter_core::download::{validate_image_refs, validate_user_id, ImageRef};
use shutter_core::error::CoreError;
use shutter_core::types::RequestId;
use shutter_db::models::download_request::{CreateDownloadRequest, DownloadRequest, DownloadRequestView};
use shutter_db::repositories::download_request_repo::{DEFAULT_LIMIT, MAX_LIMIT};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load a ledger row or fail with 404.
async fn ensure_request_exists(state: &AppState, id: RequestId) -> AppResult<DownloadRequest> {
    state.ledger.find(id).await?.ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "DownloadRequest",
            id: id.to_string(),
        })
    })
}

/// Current view of `id`, falling back to `row` if it vanished.
async fn current_view(state: &AppState, row: DownloadRequest) -> AppResult<DownloadRequestView> {
    let latest = state.ledger.find(row.id).await?.unwrap_or(row);
    Ok(latest.into())
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDownloadBody {
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub user_id: String,
    #[serde(rename = "isHD", alias = "isHighDefinition", default)]
    pub is_hd: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDownloadsQuery {
    pub user_id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessBody {
    pub claim_token: Uuid,
}

// ---------------------------------------------------------------------------
// POST /downloads
// ---------------------------------------------------------------------------

/// Record a bulk-download request.
///
/// Small batches are processed inline: the handler reserves a processing
/// slot, claims the row and waits up to `sync_wait_secs` for the result
/// (200). Large batches, a full processor or a slow run answer 202 and
/// leave the row to the drainer.
///
/// The user's cached list pages are dropped before answering, so a list
/// issued right after this response already shows the new row.
pub async fn create_download(
    State(state): State<AppState>,
    Json(body): Json<CreateDownloadBody>,
) -> AppResult<impl IntoResponse> {
    validate_user_id(&body.user_id)?;
    validate_image_refs(&body.images)?;

    let image_count = body.images.len();
    let row = state
        .processor
        .enqueue(CreateDownloadRequest {
            user_id: body.user_id.trim().to_string(),
            image_refs: body.images,
            is_high_definition: body.is_hd,
        })
        .await?;
    let user_id = row.user_id.clone();
    state.list_cache.invalidate_user(&user_id).await;

    let response = answer_new_request(&state, row, image_count).await;
    state.list_cache.invalidate_user(&user_id).await;
    response
}

type ViewResponse = (StatusCode, Json<DataResponse<DownloadRequestView>>);

/// Run a fresh row inline when it is small and a slot is free.
async fn answer_new_request(
    state: &AppState,
    row: DownloadRequest,
    image_count: usize,
) -> AppResult<ViewResponse> {
    if image_count > state.config.sync_max_images {
        return Ok(accepted(row.into()));
    }

    let Ok(reservation) = state.processor.try_reserve() else {
        tracing::info!(request_id = %row.id, "Processor busy, leaving request for the drainer");
        return Ok(accepted(row.into()));
    };
    let Some(claimed) = state.processor.claim(row.id).await? else {
        return Ok(accepted(current_view(state, row).await?));
    };

    // Spawned so the run survives a client disconnect or a slow answer.
    let processor = state.processor.clone();
    let run_row = claimed.clone();
    let handle = tokio::spawn(async move { processor.run_reserved(reservation, &run_row).await });

    let wait = Duration::from_secs(state.config.sync_wait_secs);
    match tokio::time::timeout(wait, handle).await {
        Ok(Ok(Ok(_))) => {
            let view = current_view(state, claimed).await?;
            Ok((StatusCode::OK, Json(DataResponse { data: view })))
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(request_id = %row.id, error = %e, "Inline processing did not complete");
            Ok(accepted(current_view(state, claimed).await?))
        }
        Ok(Err(join_err)) => {
            tracing::error!(request_id = %row.id, error = %join_err, "Inline processing task failed");
            Ok(accepted(current_view(state, claimed).await?))
        }
        Err(_) => {
            tracing::info!(request_id = %row.id, "Inline processing still running, answering 202");
            Ok(accepted(current_view(state, claimed).await?))
        }
    }
}

fn accepted(view: DownloadRequestView) -> ViewResponse {
    (StatusCode::ACCEPTED, Json(DataResponse { data: view }))
}

// ---------------------------------------------------------------------------
// GET /downloads
// ---------------------------------------------------------------------------

/// List a user's requests, newest first.
pub async fn list_downloads(
    State(state): State<AppState>,
    Query(params): Query<ListDownloadsQuery>,
) -> AppResult<impl IntoResponse> {
    let user_id = params.user_id.unwrap_or_default();
    validate_user_id(&user_id)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    if let Some(rows) = state.list_cache.get(&user_id, limit, offset).await {
        return Ok(Json(DataResponse { data: rows }));
    }

    let generation = state.list_cache.generation(&user_id).await;
    let rows: Vec<DownloadRequestView> = state
        .ledger
        .list_by_user(&user_id, limit, offset)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    state
        .list_cache
        .insert(&user_id, limit, offset, generation, rows.clone())
        .await;

    Ok(Json(DataResponse { data: rows }))
}

// ---------------------------------------------------------------------------
// GET /downloads/{id}
// ---------------------------------------------------------------------------

pub async fn get_download(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> AppResult<impl IntoResponse> {
    let row = ensure_request_exists(&state, id).await?;
    Ok(Json(DataResponse {
        data: DownloadRequestView::from(row),
    }))
}

// ---------------------------------------------------------------------------
// POST /downloads/{id}/process
// ---------------------------------------------------------------------------

/// Process a row the caller already claimed.
///
/// 546 when no processing slot is free, 409 when `claimToken` is not the
/// row's current claim.
pub async fn process_download(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
    Json(body): Json<ProcessBody>,
) -> AppResult<impl IntoResponse> {
    ensure_request_exists(&state, id).await?;

    let processor = state.processor.clone();
    let handle =
        tokio::spawn(async move { processor.process_by_claim(id, body.claim_token).await });
    let outcome = handle
        .await
        .map_err(|e| AppError::InternalError(format!("processing task failed: {e}")))??;

    Ok(Json(DataResponse { data: outcome }))
}
