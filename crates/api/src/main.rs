use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shutter_api::background;
use shutter_api::cache::ListCache;
use shutter_api::config::{LedgerBackend, ServerConfig};
use shutter_api::router::build_app_router;
use shutter_api::state::AppState;
use shutter_events::EventBus;
use shutter_pipeline::config::{DispatchMode, PipelineConfig, StorageConfig};
use shutter_pipeline::{
    store, Archiver, Dispatch, DownloadProcessor, Drainer, Fetcher, Ledger, LocalDispatch,
    MemoryLedger, PgLedger, RemoteDispatch,
};

/// Time kept free between the end of a drain and the request timeout.
const DRAIN_RESPONSE_MARGIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shutter_api=debug,shutter_pipeline=debug,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v == "json");
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let mut pipeline = PipelineConfig::from_env().expect("Invalid pipeline configuration");
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // A drain answered over HTTP must finish before the request timeout.
    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    let drain_ceiling = request_timeout
        .saturating_sub(DRAIN_RESPONSE_MARGIN)
        .max(Duration::from_secs(1));
    if pipeline.drainer.invocation_timeout > drain_ceiling {
        tracing::warn!(
            invocation_timeout_secs = pipeline.drainer.invocation_timeout.as_secs(),
            request_timeout_secs = config.request_timeout_secs,
            "Drain invocation timeout exceeds request timeout, lowering it",
        );
        pipeline.drainer.invocation_timeout = drain_ceiling;
    }

    // --- Ledger ---
    let ledger: Arc<dyn Ledger> = match config.ledger_backend {
        LedgerBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL must be set");
            let pool = shutter_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            shutter_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            tracing::info!("Database health check passed");

            shutter_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgLedger::new(pool))
        }
        LedgerBackend::Memory => {
            tracing::warn!("Using in-memory ledger; requests are lost on restart");
            Arc::new(MemoryLedger::new())
        }
    };

    // --- Object store ---
    let object_store = store::from_config(&pipeline.storage)
        .await
        .expect("Failed to configure object store");
    let files_root = match &pipeline.storage {
        StorageConfig::Local { root, .. } => Some(root.clone()),
        _ => None,
    };

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // --- Pipeline ---
    let fetcher = Fetcher::new(pipeline.fetch.clone()).expect("Failed to build HTTP client");
    let processor = Arc::new(DownloadProcessor::new(
        Arc::clone(&ledger),
        object_store,
        Archiver::new(fetcher, pipeline.archive.clone()),
        Arc::clone(&event_bus),
        pipeline.max_concurrent_jobs,
    )
    .with_processing_timeout(pipeline.drainer.item_budget(None)));

    let dispatch: Arc<dyn Dispatch> = match &pipeline.drainer.dispatch {
        DispatchMode::Local => Arc::new(LocalDispatch::new(Arc::clone(&processor))),
        DispatchMode::Remote { base_url } => Arc::new(
            RemoteDispatch::new(base_url.clone(), pipeline.drainer.dispatch_timeout)
                .expect("Failed to build dispatch client"),
        ),
    };

    let cancel = CancellationToken::new();
    let drainer = Arc::new(Drainer::new(
        Arc::clone(&ledger),
        dispatch,
        Arc::clone(&event_bus),
        pipeline.drainer.clone(),
        cancel.clone(),
    ));
    tracing::info!(
        max_concurrent_jobs = pipeline.max_concurrent_jobs,
        max_batch_size = pipeline.drainer.max_batch_size,
        processing_timeout_secs = processor.processing_timeout().as_secs(),
        invocation_timeout_secs = pipeline.drainer.invocation_timeout.as_secs(),
        dispatch = ?pipeline.drainer.dispatch,
        "Download pipeline ready",
    );

    // --- Background tasks ---
    let list_cache = Arc::new(ListCache::new());
    let cache_handle = tokio::spawn(background::cache_invalidation::run(
        Arc::clone(&list_cache),
        event_bus.subscribe(),
    ));

    let schedule_handle = config.drain_schedule_enabled.then(|| {
        tokio::spawn(shutter_pipeline::drainer::run_scheduled(
            Arc::clone(&drainer),
            pipeline.drainer.interval,
            cancel.clone(),
        ))
    });

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        ledger,
        processor,
        drainer,
        event_bus,
        list_cache,
        files_root,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    cancel.cancel();
    if let Some(handle) = schedule_handle {
        let _ = tokio::time::timeout(grace, handle).await;
        tracing::info!("Drain schedule stopped");
    }

    cache_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
