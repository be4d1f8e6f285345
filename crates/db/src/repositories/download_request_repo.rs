//! Repository for the `download_requests` table.
//!
//! All status transitions are single conditional `UPDATE`s so that claims
//! and completions stay atomic across concurrent drainer invocations.

use shutter_core::types::{RequestId, Timestamp};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::download_request::{
    CreateDownloadRequest, DownloadRequest, FailedUpdate, ReadyUpdate,
};
use crate::models::status::DownloadStatus;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, user_id, image_refs, is_high_definition, status_id, \
    download_url, error_detail, archived_count, skipped_count, claim_token, \
    claimed_at, completed_at, created_at, updated_at";

/// Maximum page size for listing.
pub const MAX_LIMIT: i64 = 100;

/// Default page size for listing.
pub const DEFAULT_LIMIT: i64 = 20;

/// Provides creation, claiming and completion of download requests.
pub struct DownloadRequestRepo;

impl DownloadRequestRepo {
    /// Insert a new `pending` request. Returns the created row.
    pub async fn create(
        pool: &PgPool,
        id: RequestId,
        input: &CreateDownloadRequest,
    ) -> Result<DownloadRequest, sqlx::Error> {
        let query = format!(
            "INSERT INTO download_requests (id, user_id, image_refs, is_high_definition, status_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DownloadRequest>(&query)
            .bind(id)
            .bind(&input.user_id)
            .bind(Json(&input.image_refs))
            .bind(input.is_high_definition)
            .bind(DownloadStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Find a request by ID.
    pub async fn find_by_id(
        pool: &PgPool,
        id: RequestId,
    ) -> Result<Option<DownloadRequest>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM download_requests WHERE id = $1");
        sqlx::query_as::<_, DownloadRequest>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List a user's requests, newest first.
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DownloadRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM download_requests \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, DownloadRequest>(&query)
            .bind(user_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .bind(offset.max(0))
            .fetch_all(pool)
            .await
    }

    /// Claim one specific request if it is still `pending`.
    ///
    /// Returns `None` when the row does not exist or somebody else already
    /// claimed it.
    pub async fn claim_by_id(
        pool: &PgPool,
        id: RequestId,
        claim_token: Uuid,
    ) -> Result<Option<DownloadRequest>, sqlx::Error> {
        let query = format!(
            "UPDATE download_requests \
             SET status_id = $1, claim_token = $2, claimed_at = NOW() \
             WHERE id = $3 AND status_id = $4 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DownloadRequest>(&query)
            .bind(DownloadStatus::Processing.id())
            .bind(claim_token)
            .bind(id)
            .bind(DownloadStatus::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// Atomically claim the oldest claimable request.
    ///
    /// Claimable means `pending`, or `processing` with a claim older than
    /// `stale_before`. Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent
    /// drainers never receive the same row.
    pub async fn claim_next(
        pool: &PgPool,
        claim_token: Uuid,
        stale_before: Timestamp,
    ) -> Result<Option<DownloadRequest>, sqlx::Error> {
        let query = format!(
            "UPDATE download_requests \
             SET status_id = $1, claim_token = $2, claimed_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM download_requests \
                 WHERE status_id = $3 \
                    OR (status_id = $1 AND claimed_at < $4) \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DownloadRequest>(&query)
            .bind(DownloadStatus::Processing.id())
            .bind(claim_token)
            .bind(DownloadStatus::Pending.id())
            .bind(stale_before)
            .fetch_optional(pool)
            .await
    }

    /// Move a claimed request to `ready`.
    ///
    /// Returns `false` when the claim was superseded (stale reclaim) or the
    /// row is no longer `processing`.
    pub async fn mark_ready(
        pool: &PgPool,
        id: RequestId,
        claim_token: Uuid,
        update: &ReadyUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE download_requests \
             SET status_id = $3, download_url = $4, error_detail = NULL, \
                 archived_count = $5, skipped_count = $6, completed_at = NOW() \
             WHERE id = $1 AND claim_token = $2 AND status_id = $7",
        )
        .bind(id)
        .bind(claim_token)
        .bind(DownloadStatus::Ready.id())
        .bind(&update.download_url)
        .bind(update.archived_count)
        .bind(update.skipped_count)
        .bind(DownloadStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a claimed request to `failed`.
    ///
    /// Same claim semantics as [`mark_ready`](Self::mark_ready). No
    /// automatic retry exists; a new request is a new row.
    pub async fn mark_failed(
        pool: &PgPool,
        id: RequestId,
        claim_token: Uuid,
        update: &FailedUpdate,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE download_requests \
             SET status_id = $3, download_url = NULL, error_detail = $4, \
                 archived_count = $5, skipped_count = $6, completed_at = NOW() \
             WHERE id = $1 AND claim_token = $2 AND status_id = $7",
        )
        .bind(id)
        .bind(claim_token)
        .bind(DownloadStatus::Failed.id())
        .bind(Json(&update.detail))
        .bind(update.archived_count)
        .bind(update.skipped_count)
        .bind(DownloadStatus::Processing.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
