//! The download ledger: one row per request with its status lifecycle.
//!
//! `pending -> processing -> ready | failed`. Claims write a fresh claim
//! token; completions only apply while the caller still holds it. Both
//! backends perform each transition as a single atomic step.

mod memory;
mod postgres;

use async_trait::async_trait;
use shutter_core::types::{RequestId, Timestamp};
use shutter_db::models::download_request::{
    CreateDownloadRequest, DownloadRequest, FailedUpdate, ReadyUpdate,
};
use uuid::Uuid;

use crate::error::LedgerError;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Persistent store of download requests.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a new `pending` row.
    async fn create(&self, input: CreateDownloadRequest) -> Result<DownloadRequest, LedgerError>;

    async fn find(&self, id: RequestId) -> Result<Option<DownloadRequest>, LedgerError>;

    /// A user's rows, newest first.
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DownloadRequest>, LedgerError>;

    /// `pending -> processing` for one row. `None` if it is not pending.
    async fn claim(&self, id: RequestId, token: Uuid) -> Result<Option<DownloadRequest>, LedgerError>;

    /// Claim the oldest pending row, or a `processing` row whose claim is
    /// older than `stale_before`.
    async fn claim_next(
        &self,
        token: Uuid,
        stale_before: Timestamp,
    ) -> Result<Option<DownloadRequest>, LedgerError>;

    /// `processing -> ready` under `token`. `false` if the claim was lost.
    async fn mark_ready(
        &self,
        id: RequestId,
        token: Uuid,
        update: &ReadyUpdate,
    ) -> Result<bool, LedgerError>;

    /// `processing -> failed` under `token`. `false` if the claim was lost.
    async fn mark_failed(
        &self,
        id: RequestId,
        token: Uuid,
        update: &FailedUpdate,
    ) -> Result<bool, LedgerError>;

    async fn health_check(&self) -> Result<(), LedgerError>;

    fn backend(&self) -> &'static str;
}
