use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shutter_worker::{trigger, DrainTrigger, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shutter_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let drain = DrainTrigger::new(&config).context("failed to build HTTP client")?;

    let cancel = CancellationToken::new();
    let loop_handle = tokio::spawn(trigger::run(drain, config.interval, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Received Ctrl-C, shutting down");
    cancel.cancel();
    loop_handle.await.context("drain trigger task panicked")?;

    Ok(())
}
