use shutter_core::download::DEFAULT_SYNC_MAX_IMAGES;
use shutter_pipeline::config::{env_opt, env_or};
use shutter_pipeline::error::ConfigError;

/// Which ledger implementation backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    Postgres,
    Memory,
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `150`). Must exceed the
    /// drainer's per-item budget so inline processing can answer.
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Batches up to this many images are processed inline (default: `10`).
    pub sync_max_images: usize,
    /// How long the intake handler waits for an inline run (default: `120`).
    pub sync_wait_secs: u64,
    pub ledger_backend: LedgerBackend,
    /// Required when `ledger_backend` is `Postgres`.
    pub database_url: Option<String>,
    /// Run the drainer on its interval inside the server process
    /// (default: `false`; the worker binary triggers `/api/v1/drain`).
    pub drain_schedule_enabled: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `150`                   |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `SYNC_MAX_IMAGES`       | `10`                    |
    /// | `SYNC_WAIT_SECS`        | `120`                   |
    /// | `LEDGER_BACKEND`        | `postgres` (`memory`)   |
    /// | `DATABASE_URL`          | required for `postgres` |
    /// | `DRAIN_SCHEDULE_ENABLED`| `false`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_opt("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = env_or("PORT", 3000)?;

        let cors_origins: Vec<String> = env_opt("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let ledger_backend = match env_opt("LEDGER_BACKEND").as_deref() {
            None | Some("postgres") => LedgerBackend::Postgres,
            Some("memory") => LedgerBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LEDGER_BACKEND",
                    value: other.to_string(),
                })
            }
        };
        let database_url = env_opt("DATABASE_URL");
        if ledger_backend == LedgerBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing { key: "DATABASE_URL" });
        }

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 150)?,
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30)?,
            sync_max_images: env_or("SYNC_MAX_IMAGES", DEFAULT_SYNC_MAX_IMAGES)?,
            sync_wait_secs: env_or("SYNC_WAIT_SECS", 120)?,
            ledger_backend,
            database_url,
            drain_schedule_enabled: env_or("DRAIN_SCHEDULE_ENABLED", false)?,
        })
    }
}
