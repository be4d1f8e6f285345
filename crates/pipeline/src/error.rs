//! Error taxonomy of the download pipeline.
//!
//! Per-image [`FetchError`]s are absorbed by the archiver. [`ArchiveError`]
//! and [`StorageError`] end a request as `failed`. [`PipelineError`] covers
//! everything that must not touch the ledger row: resource exhaustion,
//! lost claims and ledger outages.

use std::time::Duration;

use shutter_core::types::RequestId;

/// Why a single fetch attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchCause {
    /// The server answered with a non-success status.
    #[error("HTTP {0}")]
    Status(u16),

    /// The request never produced a response (DNS, reset, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchCause {
    /// 5xx and transport failures are worth retrying; 4xx are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status(code) => *code >= 500,
            Self::Transport(_) => true,
        }
    }
}

/// An image could not be retrieved after exhausting retries.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to fetch {url} after {attempts} attempt(s): {cause}")]
pub struct FetchError {
    pub url: String,
    pub cause: FetchCause,
    pub attempts: u32,
}

/// Serializing the archive itself failed.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Publishing the archive failed.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload of '{key}' failed: {message}")]
    Upload { key: String, message: String },

    #[error("No retrievable URL for '{key}': {message}")]
    NoUrl { key: String, message: String },

    #[error("Storage misconfigured: {0}")]
    Config(String),
}

/// The ledger backend failed.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Invalid environment configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Conditions that end an attempt without a ledger transition.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The processor is at its concurrency limit. Retry next cycle.
    #[error("Processing capacity exhausted")]
    ResourceExhausted,

    /// The outer dispatch call did not answer in time.
    #[error("Dispatch timed out")]
    DispatchTimeout,

    /// The run exceeded the processor's deadline and was abandoned. The row
    /// stays `processing` until stale reclaim.
    #[error("Processing of download request {request_id} exceeded {budget:?}")]
    ProcessingTimeout { request_id: RequestId, budget: Duration },

    /// The row is not in `processing` under the presented claim.
    #[error("Download request {request_id} is not claimed by this worker")]
    NotClaimed { request_id: RequestId },

    /// The claim was superseded while we were working.
    #[error("Claim on download request {request_id} was lost")]
    ClaimLost { request_id: RequestId },

    /// The remote processing service answered unexpectedly.
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
