//! One drain call, and the interval loop around it.

use std::time::Duration;

use serde::Deserialize;
use shutter_pipeline::{DrainOutcome, DrainReport};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("drain request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("drain endpoint returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
}

/// Body of a drain response. Failures only carry `success` and `message`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub outcome: Option<DrainOutcome>,
    #[serde(default)]
    pub resource_limited: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub data: Option<DrainReport>,
}

pub struct DrainTrigger {
    client: reqwest::Client,
    endpoint: String,
    max_batch_size: Option<usize>,
}

impl DrainTrigger {
    pub fn new(config: &WorkerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.drain_endpoint.clone(),
            max_batch_size: config.max_batch_size,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invoke the drainer once.
    pub async fn fire(&self) -> Result<DrainResponse, TriggerError> {
        let mut body = serde_json::Map::new();
        if let Some(n) = self.max_batch_size {
            body.insert("maxBatchSize".to_string(), n.into());
        }

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<DrainResponse>().await {
                Ok(parsed) => parsed.message,
                Err(_) => status.canonical_reason().unwrap_or("unknown").to_string(),
            };
            return Err(TriggerError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

/// Fire on every tick until `cancel` fires. Failures are logged and the
/// next tick tries again.
pub async fn run(trigger: DrainTrigger, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        endpoint = %trigger.endpoint(),
        interval_secs = interval.as_secs(),
        "Drain trigger started",
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Drain trigger stopping");
                break;
            }
            _ = ticker.tick() => {
                match trigger.fire().await {
                    Ok(response) => tracing::info!(
                        outcome = ?response.outcome,
                        resource_limited = response.resource_limited,
                        timed_out = response.timed_out,
                        message = %response.message,
                        "Drain completed",
                    ),
                    Err(e) => tracing::error!(error = %e, "Drain call failed"),
                }
            }
        }
    }
}
