//! Drops cached list pages when a user's ledger rows change.

use std::sync::Arc;

use shutter_events::LedgerEvent;
use tokio::sync::broadcast;

use crate::cache::ListCache;

/// Consume ledger events until the bus closes.
pub async fn run(cache: Arc<ListCache>, mut rx: broadcast::Receiver<LedgerEvent>) {
    tracing::info!("List cache invalidation started");

    loop {
        match rx.recv().await {
            Ok(event) => {
                let dropped = cache.invalidate_user(&event.user_id).await;
                tracing::debug!(
                    user_id = %event.user_id,
                    request_id = %event.request_id,
                    status = %event.status,
                    dropped,
                    "List cache invalidated",
                );
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "List cache invalidation lagged, clearing cache");
                cache.invalidate_all().await;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("Event bus closed, list cache invalidation stopping");
                break;
            }
        }
    }
}
