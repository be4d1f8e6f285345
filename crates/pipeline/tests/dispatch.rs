//! Remote dispatch against a stub processing service.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use common::{image, request};
use shutter_pipeline::{Dispatch, Ledger, MemoryLedger, PipelineError, ProcessOutcome, RemoteDispatch};
use uuid::Uuid;

async fn spawn_service(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn claimed_row() -> shutter_db::models::download_request::DownloadRequest {
    let ledger = MemoryLedger::new();
    let row = ledger
        .create(request("u1", vec![image("1", "https://x/a.jpg".into(), None)]))
        .await
        .unwrap();
    ledger.claim(row.id, Uuid::new_v4()).await.unwrap().unwrap()
}

#[tokio::test]
async fn status_546_means_resource_exhausted() {
    let app = Router::new().route(
        "/api/v1/downloads/{id}/process",
        post(|| async { StatusCode::from_u16(546).unwrap() }),
    );
    let base = spawn_service(app).await;
    let dispatch = RemoteDispatch::new(base, Duration::from_secs(5)).unwrap();

    let err = dispatch.dispatch(&claimed_row().await).await.unwrap_err();
    assert_matches!(err, PipelineError::ResourceExhausted);
}

#[tokio::test]
async fn conflict_means_claim_lost() {
    let app = Router::new().route(
        "/api/v1/downloads/{id}/process",
        post(|| async { StatusCode::CONFLICT }),
    );
    let base = spawn_service(app).await;
    let dispatch = RemoteDispatch::new(base, Duration::from_secs(5)).unwrap();

    let err = dispatch.dispatch(&claimed_row().await).await.unwrap_err();
    assert_matches!(err, PipelineError::ClaimLost { .. });
}

#[tokio::test]
async fn gateway_timeout_means_processing_continues_elsewhere() {
    let app = Router::new().route(
        "/api/v1/downloads/{id}/process",
        post(|| async { StatusCode::GATEWAY_TIMEOUT }),
    );
    let base = spawn_service(app).await;
    let dispatch = RemoteDispatch::new(base, Duration::from_secs(5)).unwrap();

    let err = dispatch.dispatch(&claimed_row().await).await.unwrap_err();
    assert_matches!(err, PipelineError::DispatchTimeout);
}

#[tokio::test]
async fn success_body_is_decoded() {
    let app = Router::new().route(
        "/api/v1/downloads/{id}/process",
        post(|Json(body): Json<serde_json::Value>| async move {
            assert!(body["claimToken"].is_string());
            Json(serde_json::json!({
                "data": {
                    "status": "ready",
                    "downloadUrl": "https://cdn/x.zip",
                    "archived": 1,
                    "skipped": 0
                }
            }))
        }),
    );
    let base = spawn_service(app).await;
    let dispatch = RemoteDispatch::new(base, Duration::from_secs(5)).unwrap();

    let outcome = dispatch.dispatch(&claimed_row().await).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Ready {
            download_url: "https://cdn/x.zip".into(),
            archived: 1,
            skipped: 0,
        }
    );
}

#[tokio::test]
async fn slow_service_times_out() {
    let app = Router::new().route(
        "/api/v1/downloads/{id}/process",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK
        }),
    );
    let base = spawn_service(app).await;
    let dispatch = RemoteDispatch::new(base, Duration::from_millis(200)).unwrap();

    let err = dispatch.dispatch(&claimed_row().await).await.unwrap_err();
    assert_matches!(err, PipelineError::DispatchTimeout);
}
