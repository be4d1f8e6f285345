use std::path::PathBuf;
use std::sync::Arc;

use shutter_events::EventBus;
use shutter_pipeline::{DownloadProcessor, Drainer, Ledger};

use crate::cache::ListCache;
use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Download ledger (PostgreSQL or in-memory).
    pub ledger: Arc<dyn Ledger>,
    pub processor: Arc<DownloadProcessor>,
    pub drainer: Arc<Drainer>,
    /// Ledger transitions; drives read-side cache invalidation.
    pub event_bus: Arc<EventBus>,
    pub list_cache: Arc<ListCache>,
    /// Root served under `/files` when archives are stored on local disk.
    pub files_root: Option<PathBuf>,
}
