#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use shutter_core::download::ImageRef;
use shutter_db::models::download_request::CreateDownloadRequest;
use shutter_events::EventBus;
use shutter_pipeline::config::{ArchiveConfig, FetchConfig};
use shutter_pipeline::{Archiver, DownloadProcessor, Fetcher, Ledger, MemoryLedger, MemoryStore, ObjectStore};

// ---------------------------------------------------------------------------
// Image source
// ---------------------------------------------------------------------------

/// Hits recorded by the local image server.
#[derive(Clone, Default)]
pub struct SourceState {
    /// Calls to `/flaky/*` so far.
    pub flaky_calls: Arc<AtomicU32>,
    /// Arrival time of every `/flaky/*` and `/down/*` call.
    pub arrivals: Arc<Mutex<Vec<Instant>>>,
    /// Calls to `/missing/*`.
    pub missing_calls: Arc<AtomicU32>,
}

pub struct ImageServer {
    pub base: String,
    pub state: SourceState,
}

impl ImageServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn arrivals(&self) -> Vec<Instant> {
        self.state.arrivals.lock().unwrap().clone()
    }
}

async fn jpeg(Path(name): Path<String>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], format!("jpeg:{name}"))
}

async fn png(Path(name): Path<String>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], format!("png:{name}"))
}

async fn missing(State(state): State<SourceState>) -> StatusCode {
    state.missing_calls.fetch_add(1, Ordering::SeqCst);
    StatusCode::NOT_FOUND
}

/// 503 on the first two calls, then an image.
async fn flaky(State(state): State<SourceState>) -> impl IntoResponse {
    state.arrivals.lock().unwrap().push(Instant::now());
    let call = state.flaky_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call <= 2 {
        (StatusCode::SERVICE_UNAVAILABLE, [(header::CONTENT_TYPE, "text/plain")], "busy".to_string())
    } else {
        (StatusCode::OK, [(header::CONTENT_TYPE, "image/jpeg")], "recovered".to_string())
    }
}

/// Always 503.
async fn down(State(state): State<SourceState>) -> StatusCode {
    state.arrivals.lock().unwrap().push(Instant::now());
    StatusCode::SERVICE_UNAVAILABLE
}

/// Answers only when the request bypasses caches.
async fn uncached(headers: HeaderMap) -> impl IntoResponse {
    let no_cache = headers
        .get(header::CACHE_CONTROL)
        .is_some_and(|v| v == "no-cache")
        && headers.get(header::PRAGMA).is_some_and(|v| v == "no-cache");
    if no_cache {
        (StatusCode::OK, [(header::CONTENT_TYPE, "image/webp")], "fresh")
    } else {
        (StatusCode::BAD_REQUEST, [(header::CONTENT_TYPE, "text/plain")], "cached")
    }
}

/// Body is the raw query string.
async fn echo_query(RawQuery(query): RawQuery) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], query.unwrap_or_default())
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(10)).await;
    ([(header::CONTENT_TYPE, "image/jpeg")], "late")
}

/// Serve test images on an ephemeral local port.
pub async fn spawn_image_server() -> ImageServer {
    let state = SourceState::default();
    let app = Router::new()
        .route("/img/{name}", get(jpeg))
        .route("/png/{name}", get(png))
        .route("/missing/{name}", get(missing))
        .route("/flaky/{name}", get(flaky))
        .route("/down/{name}", get(down))
        .route("/uncached", get(uncached))
        .route("/query", get(echo_query))
        .route("/slow/{name}", get(slow))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ImageServer {
        base: format!("http://{addr}"),
        state,
    }
}

// ---------------------------------------------------------------------------
// Pipeline wiring
// ---------------------------------------------------------------------------

/// Retry quickly and fetch URLs unchanged.
pub fn fast_fetch_config() -> FetchConfig {
    FetchConfig {
        base_delay: Duration::from_millis(20),
        request_timeout: Duration::from_secs(15),
        sd_max_width: None,
        ..FetchConfig::default()
    }
}

pub fn archiver(fetch: FetchConfig) -> Archiver {
    Archiver::new(Fetcher::new(fetch).unwrap(), ArchiveConfig::default())
}

pub fn image(id: &str, url: String, title: Option<&str>) -> ImageRef {
    ImageRef {
        id: id.to_string(),
        url,
        title: title.map(str::to_string),
    }
}

pub fn request(user_id: &str, images: Vec<ImageRef>) -> CreateDownloadRequest {
    CreateDownloadRequest {
        user_id: user_id.to_string(),
        image_refs: images,
        is_high_definition: true,
    }
}

/// In-memory ledger, store and bus around one processor.
pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub store: Arc<MemoryStore>,
    pub events: Arc<EventBus>,
    pub processor: Arc<DownloadProcessor>,
}

pub fn harness(max_concurrent_jobs: usize) -> Harness {
    harness_with_store(max_concurrent_jobs, None)
}

/// Like [`harness`], with every run bounded by `processing_timeout`.
pub fn harness_with_timeout(max_concurrent_jobs: usize, processing_timeout: Duration) -> Harness {
    build_harness(max_concurrent_jobs, None, Some(processing_timeout))
}

/// Like [`harness`], optionally replacing the object store.
pub fn harness_with_store(
    max_concurrent_jobs: usize,
    store_override: Option<Arc<dyn ObjectStore>>,
) -> Harness {
    build_harness(max_concurrent_jobs, store_override, None)
}

fn build_harness(
    max_concurrent_jobs: usize,
    store_override: Option<Arc<dyn ObjectStore>>,
    processing_timeout: Option<Duration>,
) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryStore::new("memory://archives"));
    let events = Arc::new(EventBus::default());
    let object_store = store_override.unwrap_or_else(|| Arc::clone(&store) as Arc<dyn ObjectStore>);

    let mut processor = DownloadProcessor::new(
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        object_store,
        archiver(fast_fetch_config()),
        Arc::clone(&events),
        max_concurrent_jobs,
    );
    if let Some(timeout) = processing_timeout {
        processor = processor.with_processing_timeout(timeout);
    }
    let processor = Arc::new(processor);

    Harness {
        ledger,
        store,
        events,
        processor,
    }
}
