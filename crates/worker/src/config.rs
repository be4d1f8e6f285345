use std::time::Duration;

use shutter_pipeline::config::{env_opt, env_or, MAX_DRAIN_BATCH_SIZE};
use shutter_pipeline::error::ConfigError;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Full URL of the drain endpoint.
    pub drain_endpoint: String,
    /// Time between drain calls.
    pub interval: Duration,
    /// Timeout of one drain call. Must cover the server's processing budget.
    pub request_timeout: Duration,
    /// Batch size sent with every call; `None` uses the server default.
    pub max_batch_size: Option<usize>,
}

impl WorkerConfig {
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `DRAIN_ENDPOINT`             | `{API_BASE_URL}/api/v1/drain` |
    /// | `API_BASE_URL`               | `http://127.0.0.1:3000`  |
    /// | `DRAIN_INTERVAL_SECS`        | `60`                     |
    /// | `DRAIN_REQUEST_TIMEOUT_SECS` | `150`                    |
    /// | `DRAIN_MAX_BATCH_SIZE`       | unset                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let drain_endpoint = match env_opt("DRAIN_ENDPOINT") {
            Some(endpoint) => endpoint,
            None => {
                let base = env_opt("API_BASE_URL")
                    .unwrap_or_else(|| "http://127.0.0.1:3000".to_string());
                drain_endpoint_for(&base)
            }
        };

        let interval_secs: u64 = env_or("DRAIN_INTERVAL_SECS", 60)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "DRAIN_INTERVAL_SECS",
                value: interval_secs.to_string(),
            });
        }
        let timeout_secs: u64 = env_or("DRAIN_REQUEST_TIMEOUT_SECS", 150)?;

        let max_batch_size = match env_opt("DRAIN_MAX_BATCH_SIZE") {
            None => None,
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if (1..=MAX_DRAIN_BATCH_SIZE).contains(&n) => Some(n),
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "DRAIN_MAX_BATCH_SIZE",
                        value: raw,
                    })
                }
            },
        };

        Ok(Self {
            drain_endpoint,
            interval: Duration::from_secs(interval_secs),
            request_timeout: Duration::from_secs(timeout_secs),
            max_batch_size,
        })
    }
}

/// Drain endpoint under an API base URL.
pub fn drain_endpoint_for(base_url: &str) -> String {
    format!("{}/api/v1/drain", base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_without_double_slash() {
        assert_eq!(
            drain_endpoint_for("http://api:3000/"),
            "http://api:3000/api/v1/drain"
        );
        assert_eq!(
            drain_endpoint_for("http://api:3000"),
            "http://api:3000/api/v1/drain"
        );
    }
}
