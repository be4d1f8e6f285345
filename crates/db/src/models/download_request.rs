//! Download request (ledger) entity model and DTOs.

use serde::{Deserialize, Serialize};
use shutter_core::download::{FailureDetail, ImageRef};
use shutter_core::types::{RequestId, Timestamp};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::status::{DownloadStatus, StatusId};

/// A row from the `download_requests` table.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRequest {
    pub id: RequestId,
    pub user_id: String,
    pub image_refs: Json<Vec<ImageRef>>,
    pub is_high_definition: bool,
    pub status_id: StatusId,
    pub download_url: Option<String>,
    pub error_detail: Option<Json<FailureDetail>>,
    pub archived_count: i32,
    pub skipped_count: i32,
    pub claim_token: Option<Uuid>,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl DownloadRequest {
    /// Decoded status. Unknown ids (newer schema) read as `None`.
    pub fn status(&self) -> Option<DownloadStatus> {
        DownloadStatus::from_id(self.status_id)
    }

    /// The captured image snapshot.
    pub fn images(&self) -> &[ImageRef] {
        &self.image_refs.0
    }
}

/// DTO for inserting a new pending download request.
#[derive(Debug, Clone)]
pub struct CreateDownloadRequest {
    pub user_id: String,
    pub image_refs: Vec<ImageRef>,
    pub is_high_definition: bool,
}

/// Terminal result written together with `ready`.
#[derive(Debug, Clone)]
pub struct ReadyUpdate {
    pub download_url: String,
    pub archived_count: i32,
    pub skipped_count: i32,
}

/// Terminal result written together with `failed`.
#[derive(Debug, Clone)]
pub struct FailedUpdate {
    pub detail: FailureDetail,
    pub archived_count: i32,
    pub skipped_count: i32,
}

/// API view of a ledger row. Hides the claim token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequestView {
    pub id: RequestId,
    pub user_id: String,
    pub status: String,
    pub is_high_definition: bool,
    pub image_count: usize,
    pub archived_count: i32,
    pub skipped_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<FailureDetail>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<DownloadRequest> for DownloadRequestView {
    fn from(row: DownloadRequest) -> Self {
        let status = row
            .status()
            .map(|s| s.name().to_string())
            .unwrap_or_else(|| format!("unknown({})", row.status_id));
        Self {
            id: row.id,
            user_id: row.user_id,
            status,
            is_high_definition: row.is_high_definition,
            image_count: row.image_refs.0.len(),
            archived_count: row.archived_count,
            skipped_count: row.skipped_count,
            download_url: row.download_url,
            error_detail: row.error_detail.map(|d| d.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
