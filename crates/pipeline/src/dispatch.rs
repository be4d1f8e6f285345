//! How the drainer hands a claimed row to a processor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use shutter_db::models::download_request::DownloadRequest;

use crate::error::PipelineError;
use crate::processor::{DownloadProcessor, ProcessOutcome};

/// Status code a processing service answers with when it is at capacity.
pub const RESOURCE_EXHAUSTED_STATUS: u16 = 546;

/// Runs the pipeline for a row that is already claimed.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, row: &DownloadRequest) -> Result<ProcessOutcome, PipelineError>;
}

/// Process in the current process.
pub struct LocalDispatch {
    processor: Arc<DownloadProcessor>,
}

impl LocalDispatch {
    pub fn new(processor: Arc<DownloadProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl Dispatch for LocalDispatch {
    async fn dispatch(&self, row: &DownloadRequest) -> Result<ProcessOutcome, PipelineError> {
        self.processor.process(row).await
    }
}

/// Process on a separate service via `POST /api/v1/downloads/{id}/process`.
pub struct RemoteDispatch {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct DataEnvelope {
    data: ProcessOutcome,
}

impl RemoteDispatch {
    /// `timeout` bounds the whole call. Expiry is reported as
    /// [`PipelineError::DispatchTimeout`]; the callee keeps working.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn process_url(&self, row: &DownloadRequest) -> String {
        format!(
            "{}/api/v1/downloads/{}/process",
            self.base_url.trim_end_matches('/'),
            row.id
        )
    }
}

#[async_trait]
impl Dispatch for RemoteDispatch {
    async fn dispatch(&self, row: &DownloadRequest) -> Result<ProcessOutcome, PipelineError> {
        let token = row
            .claim_token
            .ok_or(PipelineError::NotClaimed { request_id: row.id })?;

        let response = self
            .client
            .post(self.process_url(row))
            .json(&serde_json::json!({ "claimToken": token }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::DispatchTimeout
                } else {
                    PipelineError::Dispatch(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == RESOURCE_EXHAUSTED_STATUS {
            return Err(PipelineError::ResourceExhausted);
        }
        if status == StatusCode::GATEWAY_TIMEOUT {
            return Err(PipelineError::DispatchTimeout);
        }
        if status == StatusCode::CONFLICT {
            return Err(PipelineError::ClaimLost { request_id: row.id });
        }
        if !status.is_success() {
            return Err(PipelineError::Dispatch(format!(
                "processing service returned HTTP {}",
                status.as_u16()
            )));
        }

        let body: DataEnvelope = response.json().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::DispatchTimeout
            } else {
                PipelineError::Dispatch(e.to_string())
            }
        })?;
        Ok(body.data)
    }
}
