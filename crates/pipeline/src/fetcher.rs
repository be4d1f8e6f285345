//! Single-image HTTP fetch with bounded retry and exponential backoff.
//!
//! [`Fetcher`] issues cache-bypassing GET requests. Server errors (5xx) and
//! transport failures are retried up to [`FetchConfig::max_attempts`] total
//! attempts; client errors (4xx) fail immediately.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use reqwest::Url;
use shutter_core::naming::extension_for_content_type;

use crate::config::FetchConfig;
use crate::error::{FetchCause, FetchError};

/// A successfully downloaded image.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    /// File extension inferred from `content_type`.
    pub extension: &'static str,
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`.
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Resolve the URL actually fetched for the requested quality.
///
/// HD requests use the stored URL as is. Standard-definition requests get
/// `width` and `quality` query parameters unless the URL already carries a
/// `width` or SD transforms are disabled. Unparseable URLs pass through and
/// fail in the fetch itself.
pub fn source_url(url: &str, high_definition: bool, config: &FetchConfig) -> String {
    let Some(width) = config.sd_max_width else {
        return url.to_string();
    };
    if high_definition {
        return url.to_string();
    }
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if parsed.query_pairs().any(|(k, _)| k == "width") {
        return url.to_string();
    }
    parsed
        .query_pairs_mut()
        .append_pair("width", &width.to_string())
        .append_pair("quality", &config.sd_quality.to_string());
    parsed.into()
}

/// Downloads remote images.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    /// Create a fetcher with its own HTTP client.
    pub fn new(config: FetchConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `url`, retrying transient failures with exponential backoff.
    pub async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.try_fetch(url).await {
                Ok(image) => {
                    if attempt > 1 {
                        tracing::debug!(url, attempt, "Image fetched after retry");
                    }
                    return Ok(image);
                }
                Err(cause) => {
                    if !cause.is_retryable() || attempt >= self.config.max_attempts {
                        tracing::warn!(url, attempt, error = %cause, "Image fetch failed");
                        return Err(FetchError {
                            url: url.to_string(),
                            cause,
                            attempts: attempt,
                        });
                    }
                    let delay = backoff_delay(self.config.base_delay, attempt);
                    tracing::debug!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "Image fetch attempt failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Execute a single GET and read the full body.
    async fn try_fetch(&self, url: &str) -> Result<FetchedImage, FetchCause> {
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(|e| FetchCause::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchCause::Transport(e.to_string()))?;

        Ok(FetchedImage {
            extension: extension_for_content_type(content_type.as_deref()),
            content_type,
            bytes,
        })
    }
}
