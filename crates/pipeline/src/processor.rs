//! Per-request pipeline: fetch, archive, publish, record.
//!
//! [`DownloadProcessor`] owns the ledger transitions of one request. It runs
//! a claimed row through the [`Archiver`], uploads the result to the
//! [`ObjectStore`] and moves the row to `ready` or `failed`. Concurrency is
//! bounded by a semaphore; a full semaphore surfaces as
//! [`PipelineError::ResourceExhausted`] and leaves the row untouched. Every
//! run is bounded by a deadline that must stay below the stale-claim age.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shutter_core::download::{archive_object_key, FailureDetail, FailureKind, ARCHIVE_CONTENT_TYPE};
use shutter_core::types::{RequestId, Timestamp};
use shutter_db::models::download_request::{
    CreateDownloadRequest, DownloadRequest, FailedUpdate, ReadyUpdate,
};
use shutter_db::models::status::DownloadStatus;
use shutter_events::{EventBus, LedgerEvent};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::archiver::Archiver;
use crate::error::{LedgerError, PipelineError};
use crate::ledger::Ledger;
use crate::store::ObjectStore;

/// Terminal result of processing one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProcessOutcome {
    Ready {
        download_url: String,
        archived: usize,
        skipped: usize,
    },
    Failed {
        error_detail: FailureDetail,
    },
}

/// A held processing slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Reservation {
    _permit: OwnedSemaphorePermit,
}

/// Deadline of one run unless [`DownloadProcessor::with_processing_timeout`]
/// says otherwise.
pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(120);

pub struct DownloadProcessor {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn ObjectStore>,
    archiver: Archiver,
    events: Arc<EventBus>,
    permits: Arc<Semaphore>,
    processing_timeout: Duration,
}

impl DownloadProcessor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ObjectStore>,
        archiver: Archiver,
        events: Arc<EventBus>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            ledger,
            store,
            archiver,
            events,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
        }
    }

    /// Bound every run by `timeout`.
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn processing_timeout(&self) -> Duration {
        self.processing_timeout
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Processing slots currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Record a new `pending` request.
    pub async fn enqueue(&self, input: CreateDownloadRequest) -> Result<DownloadRequest, LedgerError> {
        let row = self.ledger.create(input).await?;
        tracing::info!(
            request_id = %row.id,
            user_id = %row.user_id,
            images = row.images().len(),
            "Download request enqueued",
        );
        self.publish(&row, DownloadStatus::Pending);
        Ok(row)
    }

    /// Claim a specific `pending` row under a fresh token.
    pub async fn claim(&self, id: RequestId) -> Result<Option<DownloadRequest>, LedgerError> {
        let claimed = self.ledger.claim(id, Uuid::new_v4()).await?;
        if let Some(row) = &claimed {
            self.publish(row, DownloadStatus::Processing);
        }
        Ok(claimed)
    }

    /// Claim the next claimable row (pending, or processing with a claim
    /// older than `stale_before`).
    pub async fn claim_next(
        &self,
        stale_before: Timestamp,
    ) -> Result<Option<DownloadRequest>, LedgerError> {
        let claimed = self.ledger.claim_next(Uuid::new_v4(), stale_before).await?;
        if let Some(row) = &claimed {
            tracing::debug!(request_id = %row.id, "Claimed download request");
            self.publish(row, DownloadStatus::Processing);
        }
        Ok(claimed)
    }

    /// Take a processing slot without waiting.
    pub fn try_reserve(&self) -> Result<Reservation, PipelineError> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map(|permit| Reservation { _permit: permit })
            .map_err(|_| PipelineError::ResourceExhausted)
    }

    /// Process a claimed row, taking a slot first.
    pub async fn process(&self, row: &DownloadRequest) -> Result<ProcessOutcome, PipelineError> {
        let reservation = self.try_reserve()?;
        self.run_reserved(reservation, row).await
    }

    /// Process the row `id` on behalf of the holder of `claim_token`.
    ///
    /// Fails with [`PipelineError::NotClaimed`] unless the row is
    /// `processing` under exactly that token.
    pub async fn process_by_claim(
        &self,
        id: RequestId,
        claim_token: Uuid,
    ) -> Result<ProcessOutcome, PipelineError> {
        let row = self
            .ledger
            .find(id)
            .await?
            .filter(|row| {
                row.status() == Some(DownloadStatus::Processing)
                    && row.claim_token == Some(claim_token)
            })
            .ok_or(PipelineError::NotClaimed { request_id: id })?;
        self.process(&row).await
    }

    /// Run the pipeline for a claimed row while holding `reservation`.
    ///
    /// Past the processing deadline the run is dropped and
    /// [`PipelineError::ProcessingTimeout`] returned; the row is left
    /// `processing` for stale reclaim.
    pub async fn run_reserved(
        &self,
        reservation: Reservation,
        row: &DownloadRequest,
    ) -> Result<ProcessOutcome, PipelineError> {
        let token = row
            .claim_token
            .ok_or(PipelineError::NotClaimed { request_id: row.id })?;

        tracing::info!(
            request_id = %row.id,
            images = row.images().len(),
            high_definition = row.is_high_definition,
            "Processing download request",
        );

        let outcome = match tokio::time::timeout(self.processing_timeout, self.run(row, token)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    request_id = %row.id,
                    budget_ms = self.processing_timeout.as_millis() as u64,
                    "Processing deadline exceeded, abandoning run",
                );
                Err(PipelineError::ProcessingTimeout {
                    request_id: row.id,
                    budget: self.processing_timeout,
                })
            }
        };
        drop(reservation);
        outcome
    }

    async fn run(&self, row: &DownloadRequest, token: Uuid) -> Result<ProcessOutcome, PipelineError> {
        let output = match self.archiver.build(row.images(), row.is_high_definition).await {
            Ok(output) => output,
            Err(e) => {
                let detail = FailureDetail::new(FailureKind::Archive, e.to_string());
                return self.fail(row, token, detail, 0, 0).await;
            }
        };

        let archived = output.archived();
        let skipped = output.skipped.len();

        if output.is_empty() {
            let detail = FailureDetail::nothing_fetched(row.images().len(), output.skipped);
            return self.fail(row, token, detail, 0, skipped).await;
        }

        let key = archive_object_key(&row.user_id, row.id);
        let download_url = match self.store.put(&key, output.bytes, ARCHIVE_CONTENT_TYPE).await {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(request_id = %row.id, key = %key, error = %e, "Archive upload failed");
                let mut detail = FailureDetail::new(FailureKind::Storage, e.to_string());
                detail.failed_images = output.skipped;
                return self.fail(row, token, detail, archived, skipped).await;
            }
        };

        let update = ReadyUpdate {
            download_url: download_url.clone(),
            archived_count: archived as i32,
            skipped_count: skipped as i32,
        };
        if !self.ledger.mark_ready(row.id, token, &update).await? {
            tracing::warn!(request_id = %row.id, "Claim lost before completion, result discarded");
            return Err(PipelineError::ClaimLost { request_id: row.id });
        }

        tracing::info!(request_id = %row.id, archived, skipped, "Download request ready");
        self.publish(row, DownloadStatus::Ready);

        Ok(ProcessOutcome::Ready {
            download_url,
            archived,
            skipped,
        })
    }

    async fn fail(
        &self,
        row: &DownloadRequest,
        token: Uuid,
        detail: FailureDetail,
        archived: usize,
        skipped: usize,
    ) -> Result<ProcessOutcome, PipelineError> {
        let update = FailedUpdate {
            detail: detail.clone(),
            archived_count: archived as i32,
            skipped_count: skipped as i32,
        };
        if !self.ledger.mark_failed(row.id, token, &update).await? {
            tracing::warn!(request_id = %row.id, "Claim lost before failure could be recorded");
            return Err(PipelineError::ClaimLost { request_id: row.id });
        }

        tracing::warn!(
            request_id = %row.id,
            kind = ?detail.kind,
            message = %detail.message,
            "Download request failed",
        );
        self.publish(row, DownloadStatus::Failed);

        Ok(ProcessOutcome::Failed {
            error_detail: detail,
        })
    }

    fn publish(&self, row: &DownloadRequest, status: DownloadStatus) {
        self.events
            .publish(LedgerEvent::new(row.id, row.user_id.clone(), status.name()));
    }
}
