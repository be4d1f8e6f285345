//! Pipeline configuration loaded from environment variables.
//!
//! Every field has a default suitable for local development. Invalid
//! values are reported as [`ConfigError`] so binaries can fail fast.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shutter_core::download::{ARCHIVE_FOLDER, ARCHIVE_GROUP_SIZE, DOWNLOAD_URL_TTL_DAYS};

use crate::error::ConfigError;

/// Hard upper bound for a single drain invocation's batch.
pub const MAX_DRAIN_BATCH_SIZE: usize = 25;

/// Read `key` and parse it, falling back to `default` when unset or blank.
pub fn env_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

/// Read an optional string variable. Blank counts as unset.
pub fn env_opt(key: &'static str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Retry and transform settings for image fetches.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Total attempts per image, first try included (default: `3`).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles afterwards (default: 300 ms).
    pub base_delay: Duration,
    /// Per-attempt HTTP timeout (default: 30 s).
    pub request_timeout: Duration,
    /// Width requested for standard-definition downloads. `None` fetches
    /// the source URL unchanged regardless of quality.
    pub sd_max_width: Option<u32>,
    /// Quality requested for standard-definition downloads (default: `80`).
    pub sd_quality: u8,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(300),
            request_timeout: Duration::from_secs(30),
            sd_max_width: Some(2048),
            sd_quality: 80,
        }
    }
}

impl FetchConfig {
    /// | Env Var               | Default |
    /// |-----------------------|---------|
    /// | `FETCH_MAX_ATTEMPTS`  | `3`     |
    /// | `FETCH_BASE_DELAY_MS` | `300`   |
    /// | `FETCH_TIMEOUT_SECS`  | `30`    |
    /// | `SD_MAX_WIDTH`        | `2048` (`0` disables) |
    /// | `SD_QUALITY`          | `80`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_attempts: u32 = env_or("FETCH_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "FETCH_MAX_ATTEMPTS",
                value: "0".into(),
            });
        }
        let sd_max_width: u32 = env_or("SD_MAX_WIDTH", 2048)?;

        Ok(Self {
            max_attempts,
            base_delay: Duration::from_millis(env_or("FETCH_BASE_DELAY_MS", 300)?),
            request_timeout: Duration::from_secs(env_or("FETCH_TIMEOUT_SECS", 30)?),
            sd_max_width: (sd_max_width > 0).then_some(sd_max_width),
            sd_quality: env_or("SD_QUALITY", defaults.sd_quality)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Archiver
// ---------------------------------------------------------------------------

/// Archive layout and compression settings.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Images fetched concurrently per group (default: `5`).
    pub group_size: usize,
    /// Deflate level, 0-9 (default: `6`).
    pub compression_level: i64,
    /// Top-level folder inside the archive (default: `images`).
    pub folder: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            group_size: ARCHIVE_GROUP_SIZE,
            compression_level: 6,
            folder: ARCHIVE_FOLDER.to_string(),
        }
    }
}

impl ArchiveConfig {
    /// | Env Var                     | Default |
    /// |-----------------------------|---------|
    /// | `ARCHIVE_COMPRESSION_LEVEL` | `6`     |
    pub fn from_env() -> Result<Self, ConfigError> {
        let level: i64 = env_or("ARCHIVE_COMPRESSION_LEVEL", 6)?;
        if !(0..=9).contains(&level) {
            return Err(ConfigError::Invalid {
                key: "ARCHIVE_COMPRESSION_LEVEL",
                value: level.to_string(),
            });
        }
        Ok(Self {
            compression_level: level,
            ..Self::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Drainer
// ---------------------------------------------------------------------------

/// How the drainer hands claimed rows to a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run the processor inside the drainer's process.
    Local,
    /// POST to a processing service's `/api/v1/downloads/{id}/process`.
    Remote { base_url: String },
}

/// Budgets for one drain invocation.
#[derive(Debug, Clone)]
pub struct DrainerConfig {
    /// Rows claimed per invocation (default: `1`).
    pub max_batch_size: usize,
    /// Wall-clock budget per claimed row (default: 120 s).
    pub processing_timeout: Duration,
    /// Timeout for the outer dispatch call in remote mode (default: 15 s).
    pub dispatch_timeout: Duration,
    /// Age after which a `processing` claim may be taken over
    /// (default: 2 x `processing_timeout`).
    pub stale_after: Duration,
    /// Wall-clock budget for one whole invocation (default: 140 s). Keep it
    /// below the HTTP request timeout of whoever triggers the drain.
    pub invocation_timeout: Duration,
    /// Schedule period for the built-in trigger (default: 60 s).
    pub interval: Duration,
    pub dispatch: DispatchMode,
}

impl Default for DrainerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1,
            processing_timeout: Duration::from_secs(120),
            dispatch_timeout: Duration::from_secs(15),
            stale_after: Duration::from_secs(240),
            invocation_timeout: Duration::from_secs(140),
            interval: Duration::from_secs(60),
            dispatch: DispatchMode::Local,
        }
    }
}

impl DrainerConfig {
    /// | Env Var                         | Default              |
    /// |---------------------------------|----------------------|
    /// | `DRAIN_MAX_BATCH_SIZE`          | `1`                  |
    /// | `DRAIN_PROCESSING_TIMEOUT_SECS` | `120`                |
    /// | `DRAIN_DISPATCH_TIMEOUT_SECS`   | `15`                 |
    /// | `STALE_CLAIM_SECS`              | 2 x processing timeout |
    /// | `DRAIN_INVOCATION_TIMEOUT_SECS` | `140`                |
    /// | `DRAIN_INTERVAL_SECS`           | `60`                 |
    /// | `DRAIN_DISPATCH`                | `local` (`remote` needs `REMOTE_PROCESSOR_URL`) |
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_batch_size: usize = env_or("DRAIN_MAX_BATCH_SIZE", 1)?;
        let processing_secs: u64 = env_or("DRAIN_PROCESSING_TIMEOUT_SECS", 120)?;
        let dispatch_secs: u64 = env_or("DRAIN_DISPATCH_TIMEOUT_SECS", 15)?;
        let stale_secs: u64 = env_or("STALE_CLAIM_SECS", processing_secs * 2)?;
        let invocation_secs: u64 = env_or("DRAIN_INVOCATION_TIMEOUT_SECS", 140)?;
        let interval_secs: u64 = env_or("DRAIN_INTERVAL_SECS", 60)?;
        if stale_secs < 2 {
            return Err(ConfigError::Invalid {
                key: "STALE_CLAIM_SECS",
                value: stale_secs.to_string(),
            });
        }

        let dispatch = match env_opt("DRAIN_DISPATCH").as_deref() {
            None | Some("local") => DispatchMode::Local,
            Some("remote") => DispatchMode::Remote {
                base_url: env_opt("REMOTE_PROCESSOR_URL").ok_or(ConfigError::Missing {
                    key: "REMOTE_PROCESSOR_URL",
                })?,
            },
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "DRAIN_DISPATCH",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            max_batch_size: max_batch_size.clamp(1, MAX_DRAIN_BATCH_SIZE),
            processing_timeout: Duration::from_secs(processing_secs),
            dispatch_timeout: Duration::from_secs(dispatch_secs),
            stale_after: Duration::from_secs(stale_secs),
            invocation_timeout: Duration::from_secs(invocation_secs),
            interval: Duration::from_secs(interval_secs),
            dispatch,
        })
    }

    /// Longest budget any single row may get: half the stale-claim age, so
    /// a row is never reclaimed while its worker may still be running.
    pub fn max_item_budget(&self) -> Duration {
        self.stale_after / 2
    }

    /// Per-row budget for an invocation, honouring an optional override in
    /// seconds and capped at [`max_item_budget`](Self::max_item_budget).
    pub fn item_budget(&self, requested_secs: Option<u64>) -> Duration {
        requested_secs
            .map(Duration::from_secs)
            .unwrap_or(self.processing_timeout)
            .min(self.max_item_budget())
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Where published archives go.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// S3 or an S3-compatible service. Credentials and region come from the
    /// standard AWS environment.
    S3 {
        bucket: String,
        endpoint: Option<String>,
        force_path_style: bool,
        /// When set, URLs are `{public_base_url}/{key}` instead of presigned.
        public_base_url: Option<String>,
        url_ttl: Duration,
    },
    /// Files on local disk, served by the API under `/files`.
    Local { root: PathBuf, public_base_url: String },
    /// Process memory. Only useful for tests and demos.
    Memory { public_base_url: String },
}

impl StorageConfig {
    /// | Env Var              | Default                        |
    /// |----------------------|--------------------------------|
    /// | `STORAGE_BACKEND`    | `local` (`s3`, `memory`)       |
    /// | `LOCAL_STORAGE_ROOT` | `./data/archives`              |
    /// | `PUBLIC_BASE_URL`    | `http://localhost:3000/files`  |
    /// | `S3_BUCKET`          | required for `s3`              |
    /// | `S3_ENDPOINT`        | unset (AWS)                    |
    /// | `S3_FORCE_PATH_STYLE`| `false`                        |
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = env_opt("STORAGE_BACKEND").unwrap_or_else(|| "local".into());
        match backend.as_str() {
            "s3" => Ok(Self::S3 {
                bucket: env_opt("S3_BUCKET").ok_or(ConfigError::Missing { key: "S3_BUCKET" })?,
                endpoint: env_opt("S3_ENDPOINT"),
                force_path_style: env_or("S3_FORCE_PATH_STYLE", false)?,
                public_base_url: env_opt("PUBLIC_BASE_URL"),
                url_ttl: Duration::from_secs(DOWNLOAD_URL_TTL_DAYS * 24 * 3600),
            }),
            "local" => Ok(Self::Local {
                root: PathBuf::from(
                    env_opt("LOCAL_STORAGE_ROOT").unwrap_or_else(|| "./data/archives".into()),
                ),
                public_base_url: env_opt("PUBLIC_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:3000/files".into()),
            }),
            "memory" => Ok(Self::Memory {
                public_base_url: env_opt("PUBLIC_BASE_URL")
                    .unwrap_or_else(|| "memory://archives".into()),
            }),
            other => Err(ConfigError::Invalid {
                key: "STORAGE_BACKEND",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Everything the processor and drainer need.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub archive: ArchiveConfig,
    /// Concurrent requests one process may work on (default: `2`).
    pub max_concurrent_jobs: usize,
    pub drainer: DrainerConfig,
    pub storage: StorageConfig,
}

impl PipelineConfig {
    /// Load all sections. `MAX_CONCURRENT_JOBS` defaults to `2`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            fetch: FetchConfig::from_env()?,
            archive: ArchiveConfig::from_env()?,
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", 2)?,
            drainer: DrainerConfig::from_env()?,
            storage: StorageConfig::from_env()?,
        })
    }
}
