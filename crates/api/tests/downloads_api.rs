//! Intake, polling and local file serving.

mod common;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::{
    body_bytes, body_json, build_test_app, build_test_app_with, get, intake_body, post_empty,
    post_json, spawn_image_server, test_config, TestOptions,
};
use serde_json::json;
use shutter_pipeline::{Ledger, LocalStore, ObjectStore};

#[tokio::test]
async fn small_batch_is_processed_inline() {
    let base = spawn_image_server().await;
    let app = build_test_app();

    let response = post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/img/a", "/img/b"])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let data = &json["data"];
    assert_eq!(data["status"], "ready");
    assert_eq!(data["archivedCount"], 2);
    let url = data["downloadUrl"].as_str().unwrap();
    assert!(!url.is_empty());
    assert!(data.get("errorDetail").is_none());

    let id = data["id"].as_str().unwrap();
    let stored = app
        .store
        .get(&format!("downloads/u1/{id}.zip"))
        .await
        .expect("archive should be stored");
    let archive = zip::ZipArchive::new(Cursor::new(stored.bytes.to_vec())).unwrap();
    let names: Vec<_> = archive.file_names().collect();
    assert!(names.contains(&"images/photo_1.jpg"));
    assert!(names.contains(&"images/photo_2.jpg"));
}

#[tokio::test]
async fn inline_total_failure_returns_failed_row() {
    let base = spawn_image_server().await;
    let app = build_test_app();

    let response = post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/missing/a"])).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "failed");
    assert_eq!(json["data"]["errorDetail"]["kind"], "fetch");
    assert!(json["data"].get("downloadUrl").is_none());
    assert!(app.store.is_empty().await);
}

#[tokio::test]
async fn large_batch_is_accepted_for_later() {
    let base = spawn_image_server().await;
    let app = build_test_app_with(TestOptions {
        config: shutter_api::config::ServerConfig {
            sync_max_images: 1,
            ..test_config()
        },
        ..TestOptions::default()
    });

    let response = post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/img/a", "/img/b"])).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "pending");
    assert!(json["data"]["id"].is_string());
}

#[tokio::test]
async fn busy_processor_leaves_request_pending() {
    let base = spawn_image_server().await;
    let app = build_test_app_with(TestOptions {
        max_concurrent_jobs: 1,
        ..TestOptions::default()
    });
    let _busy = app.state.processor.try_reserve().unwrap();

    let response = post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/img/a"])).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["data"]["status"], "pending");
}

#[tokio::test]
async fn slow_inline_run_falls_back_to_accepted() {
    let base = spawn_image_server().await;
    let app = build_test_app_with(TestOptions {
        config: shutter_api::config::ServerConfig {
            sync_wait_secs: 1,
            ..test_config()
        },
        ..TestOptions::default()
    });

    let response = post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/slow/a"])).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["data"]["status"], "processing");
}

#[tokio::test]
async fn invalid_intake_is_rejected_before_any_row_exists() {
    let app = build_test_app();

    let cases = [
        json!({ "images": [{ "id": "1", "url": "https://x/a.jpg" }], "userId": "" }),
        json!({ "images": [], "userId": "u1" }),
        json!({ "images": [{ "id": "1", "url": "ftp://x/a.jpg" }], "userId": "u1" }),
        json!({ "images": [{ "id": "", "url": "https://x/a.jpg" }], "userId": "u1" }),
    ];
    for body in cases {
        let response = post_json(&app, "/api/v1/downloads", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    }

    let rows = app.ledger.list_by_user("u1", 20, 0).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn list_requires_user_and_is_scoped() {
    let base = spawn_image_server().await;
    let app = build_test_app();
    post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/img/a"])).await;
    post_json(&app, "/api/v1/downloads", intake_body("u2", &base, &["/img/a"])).await;

    let response = get(&app, "/api/v1/downloads").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = get(&app, "/api/v1/downloads?userId=u1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let rows = json["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["userId"], "u1");
    assert!(rows[0].get("claimToken").is_none());
}

#[tokio::test]
async fn get_returns_row_or_404() {
    let base = spawn_image_server().await;
    let app = build_test_app();
    let created = body_json(post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/img/a"])).await).await;
    let id = created["data"]["id"].as_str().unwrap();

    let response = get(&app, &format!("/api/v1/downloads/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["id"], id);

    let response = get(&app, &format!("/api/v1/downloads/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    let response = get(&app, "/api/v1/downloads/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cached_list_is_invalidated_by_transitions() {
    let base = spawn_image_server().await;
    let app = build_test_app_with(TestOptions {
        config: shutter_api::config::ServerConfig {
            sync_max_images: 0,
            ..test_config()
        },
        ..TestOptions::default()
    });
    post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/img/a"])).await;

    let json = body_json(get(&app, "/api/v1/downloads?userId=u1").await).await;
    assert_eq!(json["data"][0]["status"], "pending");

    let response = post_empty(&app, "/api/v1/drain").await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut status = String::new();
    for _ in 0..50 {
        let json = body_json(get(&app, "/api/v1/downloads?userId=u1").await).await;
        status = json["data"][0]["status"].as_str().unwrap().to_string();
        if status == "ready" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "ready");
}

#[tokio::test]
async fn list_right_after_intake_includes_the_new_row() {
    let base = spawn_image_server().await;
    let app = build_test_app_with(TestOptions {
        config: shutter_api::config::ServerConfig {
            sync_max_images: 0,
            ..test_config()
        },
        ..TestOptions::default()
    });

    for round in 0..20 {
        let response = post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/img/a"])).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let created = body_json(response).await;

        let json = body_json(get(&app, "/api/v1/downloads?userId=u1&limit=50").await).await;
        let rows = json["data"].as_array().unwrap();
        assert_eq!(rows.len(), round + 1, "round {round} served a stale page");
        assert!(rows.iter().any(|row| row["id"] == created["data"]["id"]));
    }
}

#[tokio::test]
async fn abandoned_inline_run_releases_its_slot() {
    let base = spawn_image_server().await;
    let app = build_test_app_with(TestOptions {
        config: shutter_api::config::ServerConfig {
            sync_wait_secs: 1,
            ..test_config()
        },
        processing_timeout: Duration::from_secs(2),
        ..TestOptions::default()
    });

    let response = post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/slow/a"])).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let id: uuid::Uuid = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(app.state.processor.available_permits(), 1);

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(app.state.processor.available_permits(), 2);
    let row = app.ledger.find(id).await.unwrap().unwrap();
    assert_eq!(row.status(), Some(shutter_db::models::status::DownloadStatus::Processing));
}

#[tokio::test]
async fn local_archives_are_served_under_files() {
    let base = spawn_image_server().await;
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new(
        dir.path().to_path_buf(),
        "http://localhost:3000/files",
    ));
    let app = build_test_app_with(TestOptions {
        store: Some(store),
        files_root: Some(dir.path().to_path_buf()),
        ..TestOptions::default()
    });

    let json = body_json(post_json(&app, "/api/v1/downloads", intake_body("u1", &base, &["/img/a"])).await).await;
    let url = json["data"]["downloadUrl"].as_str().unwrap();
    let path = url.strip_prefix("http://localhost:3000").unwrap();
    assert!(path.starts_with("/files/downloads/u1/"));

    let response = get(&app, path).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body_bytes(response).await;
    let archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    assert!(archive.file_names().any(|n| n == "images/photo_1.jpg"));
}
