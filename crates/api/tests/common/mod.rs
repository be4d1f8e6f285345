#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Path;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get as get_route;
use axum::Router;
use http_body_util::BodyExt;
use shutter_api::cache::ListCache;
use shutter_api::config::{LedgerBackend, ServerConfig};
use shutter_api::router::build_app_router;
use shutter_api::state::AppState;
use shutter_core::download::ImageRef;
use shutter_core::types::{RequestId, Timestamp};
use shutter_db::models::download_request::{
    CreateDownloadRequest, DownloadRequest, FailedUpdate, ReadyUpdate,
};
use shutter_events::EventBus;
use shutter_pipeline::config::{ArchiveConfig, DrainerConfig, FetchConfig};
use shutter_pipeline::error::LedgerError;
use shutter_pipeline::{
    Archiver, DownloadProcessor, Drainer, Fetcher, Ledger, LocalDispatch, MemoryLedger, MemoryStore,
    ObjectStore,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        sync_max_images: 10,
        sync_wait_secs: 10,
        ledger_backend: LedgerBackend::Memory,
        database_url: None,
        drain_schedule_enabled: false,
    }
}

/// Everything a test may want to poke at besides the router.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub ledger: Arc<MemoryLedger>,
    pub store: Arc<MemoryStore>,
}

pub struct TestOptions {
    pub config: ServerConfig,
    pub max_concurrent_jobs: usize,
    /// Replaces the in-memory store.
    pub store: Option<Arc<dyn ObjectStore>>,
    pub files_root: Option<PathBuf>,
    pub ledger: Option<Arc<dyn Ledger>>,
    /// Deadline of every processor run.
    pub processing_timeout: Duration,
    pub drainer: DrainerConfig,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            config: test_config(),
            max_concurrent_jobs: 2,
            store: None,
            files_root: None,
            ledger: None,
            processing_timeout: Duration::from_secs(60),
            drainer: DrainerConfig::default(),
        }
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(TestOptions::default())
}

/// Build the full application router over in-memory backends, with the
/// same middleware stack production uses.
pub fn build_test_app_with(options: TestOptions) -> TestApp {
    let memory_ledger = Arc::new(MemoryLedger::new());
    let ledger = options
        .ledger
        .unwrap_or_else(|| Arc::clone(&memory_ledger) as Arc<dyn Ledger>);
    let memory_store = Arc::new(MemoryStore::new("memory://archives"));
    let store = options
        .store
        .unwrap_or_else(|| Arc::clone(&memory_store) as Arc<dyn ObjectStore>);
    let event_bus = Arc::new(EventBus::default());

    let fetch = FetchConfig {
        base_delay: Duration::from_millis(20),
        sd_max_width: None,
        ..FetchConfig::default()
    };
    let processor = Arc::new(DownloadProcessor::new(
        Arc::clone(&ledger),
        store,
        Archiver::new(Fetcher::new(fetch).unwrap(), ArchiveConfig::default()),
        Arc::clone(&event_bus),
        options.max_concurrent_jobs,
    )
    .with_processing_timeout(options.processing_timeout));
    let drainer = Arc::new(Drainer::new(
        Arc::clone(&ledger),
        Arc::new(LocalDispatch::new(Arc::clone(&processor))),
        Arc::clone(&event_bus),
        options.drainer,
        CancellationToken::new(),
    ));

    let list_cache = Arc::new(ListCache::new());
    tokio::spawn(shutter_api::background::cache_invalidation::run(
        Arc::clone(&list_cache),
        event_bus.subscribe(),
    ));

    let state = AppState {
        config: Arc::new(options.config.clone()),
        ledger,
        processor,
        drainer,
        event_bus,
        list_cache,
        files_root: options.files_root,
    };

    TestApp {
        router: build_app_router(state.clone(), &options.config),
        state,
        ledger: memory_ledger,
        store: memory_store,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &TestApp, uri: &str) -> Response {
    app.router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: &TestApp, uri: &str, body: serde_json::Value) -> Response {
    app.router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post_empty(app: &TestApp, uri: &str) -> Response {
    app.router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Image source
// ---------------------------------------------------------------------------

async fn jpeg(Path(name): Path<String>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], format!("jpeg:{name}"))
}

async fn missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn slow() -> impl IntoResponse {
    tokio::time::sleep(Duration::from_secs(10)).await;
    ([(header::CONTENT_TYPE, "image/jpeg")], "late")
}

/// Serve test images on an ephemeral port and return the base URL.
pub async fn spawn_image_server() -> String {
    let app = Router::new()
        .route("/img/{name}", get_route(jpeg))
        .route("/missing/{name}", get_route(missing))
        .route("/slow/{name}", get_route(slow));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Intake body with one image per path.
pub fn intake_body(user_id: &str, base: &str, paths: &[&str]) -> serde_json::Value {
    let images: Vec<_> = paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            serde_json::json!({
                "id": (i + 1).to_string(),
                "url": format!("{base}{path}"),
                "title": format!("Photo {}", i + 1),
            })
        })
        .collect();
    serde_json::json!({ "images": images, "userId": user_id, "isHD": true })
}

// ---------------------------------------------------------------------------
// Failing ledger
// ---------------------------------------------------------------------------

/// A ledger whose every call fails as if the database were down.
pub struct UnreachableLedger;

fn unreachable() -> LedgerError {
    LedgerError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl Ledger for UnreachableLedger {
    async fn create(&self, _: CreateDownloadRequest) -> Result<DownloadRequest, LedgerError> {
        Err(unreachable())
    }
    async fn find(&self, _: RequestId) -> Result<Option<DownloadRequest>, LedgerError> {
        Err(unreachable())
    }
    async fn list_by_user(&self, _: &str, _: i64, _: i64) -> Result<Vec<DownloadRequest>, LedgerError> {
        Err(unreachable())
    }
    async fn claim(&self, _: RequestId, _: Uuid) -> Result<Option<DownloadRequest>, LedgerError> {
        Err(unreachable())
    }
    async fn claim_next(&self, _: Uuid, _: Timestamp) -> Result<Option<DownloadRequest>, LedgerError> {
        Err(unreachable())
    }
    async fn mark_ready(&self, _: RequestId, _: Uuid, _: &ReadyUpdate) -> Result<bool, LedgerError> {
        Err(unreachable())
    }
    async fn mark_failed(&self, _: RequestId, _: Uuid, _: &FailedUpdate) -> Result<bool, LedgerError> {
        Err(unreachable())
    }
    async fn health_check(&self) -> Result<(), LedgerError> {
        Err(unreachable())
    }
    fn backend(&self) -> &'static str {
        "unreachable"
    }
}

/// Enqueue a request directly, bypassing intake.
pub async fn enqueue(app: &TestApp, user_id: &str, base: &str, paths: &[&str]) -> DownloadRequest {
    let image_refs = paths
        .iter()
        .enumerate()
        .map(|(i, path)| ImageRef {
            id: (i + 1).to_string(),
            url: format!("{base}{path}"),
            title: None,
        })
        .collect();
    app.state
        .processor
        .enqueue(CreateDownloadRequest {
            user_id: user_id.to_string(),
            image_refs,
            is_high_definition: true,
        })
        .await
        .unwrap()
}
