use async_trait::async_trait;
use shutter_core::types::{new_request_id, RequestId, Timestamp};
use shutter_db::models::download_request::{
    CreateDownloadRequest, DownloadRequest, FailedUpdate, ReadyUpdate,
};
use shutter_db::repositories::DownloadRequestRepo;
use shutter_db::DbPool;
use uuid::Uuid;

use super::Ledger;
use crate::error::LedgerError;

/// Ledger backed by the `download_requests` table.
#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn create(&self, input: CreateDownloadRequest) -> Result<DownloadRequest, LedgerError> {
        Ok(DownloadRequestRepo::create(&self.pool, new_request_id(), &input).await?)
    }

    async fn find(&self, id: RequestId) -> Result<Option<DownloadRequest>, LedgerError> {
        Ok(DownloadRequestRepo::find_by_id(&self.pool, id).await?)
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DownloadRequest>, LedgerError> {
        Ok(DownloadRequestRepo::list_by_user(&self.pool, user_id, limit, offset).await?)
    }

    async fn claim(&self, id: RequestId, token: Uuid) -> Result<Option<DownloadRequest>, LedgerError> {
        Ok(DownloadRequestRepo::claim_by_id(&self.pool, id, token).await?)
    }

    async fn claim_next(
        &self,
        token: Uuid,
        stale_before: Timestamp,
    ) -> Result<Option<DownloadRequest>, LedgerError> {
        Ok(DownloadRequestRepo::claim_next(&self.pool, token, stale_before).await?)
    }

    async fn mark_ready(
        &self,
        id: RequestId,
        token: Uuid,
        update: &ReadyUpdate,
    ) -> Result<bool, LedgerError> {
        Ok(DownloadRequestRepo::mark_ready(&self.pool, id, token, update).await?)
    }

    async fn mark_failed(
        &self,
        id: RequestId,
        token: Uuid,
        update: &FailedUpdate,
    ) -> Result<bool, LedgerError> {
        Ok(DownloadRequestRepo::mark_failed(&self.pool, id, token, update).await?)
    }

    async fn health_check(&self) -> Result<(), LedgerError> {
        Ok(shutter_db::health_check(&self.pool).await?)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
