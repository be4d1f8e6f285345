//! Queue drainer: claims pending rows in bounded batches.
//!
//! Each invocation claims at most `max_batch_size` rows, one at a time, and
//! gives each a hard wall-clock budget of at most half the stale-claim age.
//! The invocation as a whole stops claiming once the time left before
//! `invocation_timeout` can no longer cover a full budget. Capacity
//! exhaustion and timeouts are deferrals: the row stays `processing`, the report says `deferred`, and
//! stale reclaim hands the row to a later cycle. Only a failure to claim
//! the first row is an error of the invocation itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shutter_core::types::RequestId;
use shutter_db::models::download_request::DownloadRequest;
use shutter_db::models::status::DownloadStatus;
use shutter_events::{EventBus, LedgerEvent};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{DrainerConfig, MAX_DRAIN_BATCH_SIZE};
use crate::dispatch::Dispatch;
use crate::error::{LedgerError, PipelineError};
use crate::ledger::Ledger;
use crate::processor::ProcessOutcome;

/// Optional per-invocation overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainRequest {
    pub max_batch_size: Option<usize>,
    pub processing_timeout_seconds: Option<u64>,
}

/// Overall result of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcome {
    /// Nothing was claimable.
    #[default]
    Idle,
    /// Every claimed row reached a result.
    Completed,
    /// At least one row was left for a later cycle.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ready,
    Failed,
    Deferred,
    Error,
}

/// What happened to one claimed row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReport {
    pub request_id: RequestId,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub resource_limited: bool,
    pub timed_out: bool,
    /// Claiming stopped early to stay inside the invocation deadline.
    #[serde(default)]
    pub deadline_reached: bool,
    pub claimed: usize,
    pub ready: usize,
    pub failed: usize,
    pub deferred: usize,
    pub errors: usize,
    pub items: Vec<ItemReport>,
}

impl DrainReport {
    /// One-line summary for logs and the HTTP response.
    pub fn message(&self) -> String {
        match self.outcome {
            DrainOutcome::Idle => "No pending download requests".to_string(),
            DrainOutcome::Completed => format!(
                "Processed {} request(s): {} ready, {} failed, {} error(s)",
                self.claimed, self.ready, self.failed, self.errors
            ),
            DrainOutcome::Deferred if self.resource_limited => format!(
                "Processing capacity exhausted after {} request(s); remaining work deferred",
                self.claimed
            ),
            DrainOutcome::Deferred if self.deadline_reached => format!(
                "Invocation deadline reached after {} request(s); remaining work deferred",
                self.claimed
            ),
            DrainOutcome::Deferred => format!(
                "Processed {} request(s), {} deferred to a later run",
                self.claimed, self.deferred
            ),
        }
    }

    fn record(&mut self, item: ItemReport) {
        match item.status {
            ItemStatus::Ready => self.ready += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::Deferred => self.deferred += 1,
            ItemStatus::Error => self.errors += 1,
        }
        self.items.push(item);
    }

    fn finish(mut self) -> Self {
        self.outcome = if self.claimed == 0 {
            DrainOutcome::Idle
        } else if self.deferred > 0
            || self.resource_limited
            || self.timed_out
            || self.deadline_reached
        {
            DrainOutcome::Deferred
        } else {
            DrainOutcome::Completed
        };
        self
    }
}

enum Step {
    Done(Result<ProcessOutcome, PipelineError>),
    BudgetExpired,
    Cancelled,
}

pub struct Drainer {
    ledger: Arc<dyn Ledger>,
    dispatch: Arc<dyn Dispatch>,
    events: Arc<EventBus>,
    config: DrainerConfig,
    cancel: CancellationToken,
}

impl Drainer {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        dispatch: Arc<dyn Dispatch>,
        events: Arc<EventBus>,
        config: DrainerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            dispatch,
            events,
            config,
            cancel,
        }
    }

    pub fn config(&self) -> &DrainerConfig {
        &self.config
    }

    /// Run one invocation.
    pub async fn drain(&self, request: DrainRequest) -> Result<DrainReport, LedgerError> {
        let batch_size = request
            .max_batch_size
            .unwrap_or(self.config.max_batch_size)
            .clamp(1, MAX_DRAIN_BATCH_SIZE);
        let budget = self.config.item_budget(request.processing_timeout_seconds);
        let deadline = Instant::now() + self.config.invocation_timeout;
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let stale_before = Utc::now() - stale_after;

        let mut report = DrainReport::default();

        while report.claimed < batch_size && !self.cancel.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if report.claimed > 0 && remaining < budget {
                tracing::info!(
                    claimed = report.claimed,
                    remaining_ms = remaining.as_millis() as u64,
                    "Invocation deadline near, leaving remaining rows for a later run",
                );
                report.deadline_reached = true;
                break;
            }
            // The first row always runs, inside whatever time is left.
            let item_budget = budget.min(remaining);

            let row = match self.ledger.claim_next(Uuid::new_v4(), stale_before).await {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) if report.claimed == 0 => return Err(e),
                Err(e) => {
                    tracing::error!(error = %e, "Claim failed mid-batch, ending drain");
                    break;
                }
            };
            report.claimed += 1;
            self.events.publish(LedgerEvent::new(
                row.id,
                row.user_id.clone(),
                DownloadStatus::Processing.name(),
            ));

            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Cancelled,
                _ = tokio::time::sleep(item_budget) => Step::BudgetExpired,
                result = self.dispatch.dispatch(&row) => Step::Done(result),
            };

            let stop = self.settle(&row, step, item_budget, &mut report);
            if stop {
                break;
            }
        }

        let report = report.finish();
        tracing::info!(
            outcome = ?report.outcome,
            claimed = report.claimed,
            ready = report.ready,
            failed = report.failed,
            deferred = report.deferred,
            resource_limited = report.resource_limited,
            timed_out = report.timed_out,
            deadline_reached = report.deadline_reached,
            "Drain finished",
        );
        Ok(report)
    }

    /// Record one item's result. Returns `true` when the batch must stop.
    fn settle(
        &self,
        row: &DownloadRequest,
        step: Step,
        budget: Duration,
        report: &mut DrainReport,
    ) -> bool {
        let item = |status, download_url, message: Option<String>| ItemReport {
            request_id: row.id,
            status,
            download_url,
            message,
        };

        match step {
            Step::Done(Ok(ProcessOutcome::Ready { download_url, .. })) => {
                report.record(item(ItemStatus::Ready, Some(download_url), None));
                false
            }
            Step::Done(Ok(ProcessOutcome::Failed { error_detail })) => {
                report.record(item(ItemStatus::Failed, None, Some(error_detail.message)));
                false
            }
            Step::Done(Err(PipelineError::ResourceExhausted)) => {
                tracing::info!(request_id = %row.id, "Processor at capacity, deferring remaining work");
                report.resource_limited = true;
                report.record(item(
                    ItemStatus::Deferred,
                    None,
                    Some(PipelineError::ResourceExhausted.to_string()),
                ));
                true
            }
            Step::Done(Err(PipelineError::DispatchTimeout)) => {
                tracing::info!(request_id = %row.id, "Dispatch timed out, processing continues remotely");
                report.timed_out = true;
                report.record(item(
                    ItemStatus::Deferred,
                    None,
                    Some(PipelineError::DispatchTimeout.to_string()),
                ));
                false
            }
            Step::Done(Err(e @ PipelineError::ProcessingTimeout { .. })) => {
                tracing::warn!(request_id = %row.id, "Processing deadline exceeded, row left for stale reclaim");
                report.timed_out = true;
                report.record(item(ItemStatus::Deferred, None, Some(e.to_string())));
                false
            }
            Step::Done(Err(e)) => {
                tracing::error!(request_id = %row.id, error = %e, "Processing failed");
                report.record(item(ItemStatus::Error, None, Some(e.to_string())));
                false
            }
            Step::BudgetExpired => {
                tracing::warn!(
                    request_id = %row.id,
                    budget_ms = budget.as_millis() as u64,
                    "Processing budget exceeded, row left for stale reclaim",
                );
                report.timed_out = true;
                report.record(item(
                    ItemStatus::Deferred,
                    None,
                    Some(format!("Processing exceeded {budget:?} budget")),
                ));
                false
            }
            Step::Cancelled => {
                tracing::info!(request_id = %row.id, "Drain cancelled");
                report.record(item(
                    ItemStatus::Deferred,
                    None,
                    Some("Drain cancelled".to_string()),
                ));
                true
            }
        }
    }
}

/// Drain on a fixed interval until `cancel` fires.
pub async fn run_scheduled(drainer: Arc<Drainer>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Drain schedule started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Drain schedule stopping");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = drainer.drain(DrainRequest::default()).await {
                    tracing::error!(error = %e, "Scheduled drain could not claim work");
                }
            }
        }
    }
}
