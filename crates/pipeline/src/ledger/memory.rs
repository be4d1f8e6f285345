use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use shutter_core::types::{new_request_id, RequestId, Timestamp};
use shutter_db::models::download_request::{
    CreateDownloadRequest, DownloadRequest, FailedUpdate, ReadyUpdate,
};
use shutter_db::models::status::DownloadStatus;
use shutter_db::repositories::download_request_repo::MAX_LIMIT;
use sqlx::types::Json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Ledger;
use crate::error::LedgerError;

/// Ledger kept in process memory.
///
/// Every transition runs under one mutex, which gives the same
/// claim-exclusivity guarantees as the conditional `UPDATE`s of
/// [`PgLedger`](super::PgLedger). Rows are lost on restart.
#[derive(Default)]
pub struct MemoryLedger {
    rows: Mutex<HashMap<RequestId, DownloadRequest>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a row's claim time into the past, as if its worker had stalled.
    pub async fn backdate_claim(&self, id: RequestId, by: chrono::Duration) {
        if let Some(row) = self.rows.lock().await.get_mut(&id) {
            row.claimed_at = row.claimed_at.map(|at| at - by);
        }
    }

    fn take_claim(row: &mut DownloadRequest, token: Uuid) -> DownloadRequest {
        let now = Utc::now();
        row.status_id = DownloadStatus::Processing.id();
        row.claim_token = Some(token);
        row.claimed_at = Some(now);
        row.updated_at = now;
        row.clone()
    }

    /// Apply a terminal transition if `token` still holds the claim.
    async fn complete(
        &self,
        id: RequestId,
        token: Uuid,
        apply: impl FnOnce(&mut DownloadRequest),
    ) -> bool {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(&id) else {
            return false;
        };
        if row.status() != Some(DownloadStatus::Processing) || row.claim_token != Some(token) {
            return false;
        }
        apply(row);
        let now = Utc::now();
        row.completed_at = Some(now);
        row.updated_at = now;
        true
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create(&self, input: CreateDownloadRequest) -> Result<DownloadRequest, LedgerError> {
        let now = Utc::now();
        let row = DownloadRequest {
            id: new_request_id(),
            user_id: input.user_id,
            image_refs: Json(input.image_refs),
            is_high_definition: input.is_high_definition,
            status_id: DownloadStatus::Pending.id(),
            download_url: None,
            error_detail: None,
            archived_count: 0,
            skipped_count: 0,
            claim_token: None,
            claimed_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.rows.lock().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find(&self, id: RequestId) -> Result<Option<DownloadRequest>, LedgerError> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DownloadRequest>, LedgerError> {
        let rows = self.rows.lock().await;
        let mut owned: Vec<&DownloadRequest> =
            rows.values().filter(|r| r.user_id == user_id).collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.clamp(1, MAX_LIMIT) as usize)
            .cloned()
            .collect())
    }

    async fn claim(&self, id: RequestId, token: Uuid) -> Result<Option<DownloadRequest>, LedgerError> {
        let mut rows = self.rows.lock().await;
        Ok(rows
            .get_mut(&id)
            .filter(|row| row.status() == Some(DownloadStatus::Pending))
            .map(|row| Self::take_claim(row, token)))
    }

    async fn claim_next(
        &self,
        token: Uuid,
        stale_before: Timestamp,
    ) -> Result<Option<DownloadRequest>, LedgerError> {
        let mut rows = self.rows.lock().await;
        let next = rows
            .values()
            .filter(|row| match row.status() {
                Some(DownloadStatus::Pending) => true,
                Some(DownloadStatus::Processing) => {
                    row.claimed_at.is_some_and(|at| at < stale_before)
                }
                _ => false,
            })
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|row| row.id);

        Ok(next.and_then(|id| rows.get_mut(&id).map(|row| Self::take_claim(row, token))))
    }

    async fn mark_ready(
        &self,
        id: RequestId,
        token: Uuid,
        update: &ReadyUpdate,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .complete(id, token, |row| {
                row.status_id = DownloadStatus::Ready.id();
                row.download_url = Some(update.download_url.clone());
                row.error_detail = None;
                row.archived_count = update.archived_count;
                row.skipped_count = update.skipped_count;
            })
            .await)
    }

    async fn mark_failed(
        &self,
        id: RequestId,
        token: Uuid,
        update: &FailedUpdate,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .complete(id, token, |row| {
                row.status_id = DownloadStatus::Failed.id();
                row.download_url = None;
                row.error_detail = Some(Json(update.detail.clone()));
                row.archived_count = update.archived_count;
                row.skipped_count = update.skipped_count;
            })
            .await)
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
