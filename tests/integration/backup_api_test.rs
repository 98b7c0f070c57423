//! Admin HTTP contract for backup endpoints.

use axum::http::{StatusCode, header};
use invhub_service::RESTART_NOTICE;

use crate::helpers::{TestApp, corrupt_one_byte};

#[tokio::test]
async fn test_health_reports_idle_datastore() {
    let app = TestApp::new().await;

    let response = app.request("GET", "/api/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["status"], "ok");
    assert_eq!(response.body["data"]["datastore_busy"], false);
}

#[tokio::test]
async fn test_admin_routes_require_actor() {
    let app = TestApp::new().await;

    let response = app.request("GET", "/api/admin/backups", None).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_admin_token_enforced_when_configured() {
    let app = TestApp::with_token("s3cret").await;

    let missing = app.request("GET", "/api/admin/backups", Some("ops")).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let wrong = app
        .request_with_token("GET", "/api/admin/backups", Some("ops"), Some("guess"))
        .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let ok = app
        .request_with_token("GET", "/api/admin/backups", Some("ops"), Some("s3cret"))
        .await;
    assert_eq!(ok.status, StatusCode::OK);
}

#[tokio::test]
async fn test_create_then_list_and_get() {
    let app = TestApp::new().await;

    let name = app.create_snapshot().await;

    let list = app.request("GET", "/api/admin/backups", Some("ops")).await;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(list.body["total"], 1);
    assert_eq!(list.body["data"][0]["name"], name.as_str());
    assert_eq!(list.body["data"][0]["created_by"], "ops");

    let archive_len = std::fs::metadata(app.archive_path(&name)).unwrap().len();
    let get = app
        .request("GET", &format!("/api/admin/backups/{name}"), Some("ops"))
        .await;
    assert_eq!(get.status, StatusCode::OK);
    assert_eq!(get.body["data"]["size_bytes"], archive_len);
}

#[tokio::test]
async fn test_unknown_and_invalid_names() {
    let app = TestApp::new().await;

    let missing = app
        .request(
            "GET",
            "/api/admin/backups/inventory_1999-01-01T00-00-00",
            Some("ops"),
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let invalid = app
        .request("GET", "/api/admin/backups/bad%20name", Some("ops"))
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
    assert_eq!(invalid.body["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_verify_endpoint() {
    let app = TestApp::new().await;
    let name = app.create_snapshot().await;

    let response = app
        .request("GET", &format!("/api/admin/backups/{name}/verify"), Some("ops"))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["data"]["name"], name.as_str());
    assert_eq!(response.body["data"]["status"], "verified");
}

#[tokio::test]
async fn test_download_streams_archive() {
    let app = TestApp::new().await;
    let name = app.create_snapshot().await;

    let (status, headers, body) = app
        .send(
            "GET",
            &format!("/api/admin/backups/{name}/download"),
            Some("ops"),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/gzip");
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains(&format!("{name}.db.gz")));
    assert_eq!(body.to_vec(), std::fs::read(app.archive_path(&name)).unwrap());
}

#[tokio::test]
async fn test_verified_download_rejects_corrupt_archive() {
    let app = TestApp::new().await;
    let name = app.create_snapshot().await;
    corrupt_one_byte(&app.archive_path(&name));

    let response = app
        .request(
            "GET",
            &format!("/api/admin/backups/{name}/download?verify=true"),
            Some("ops"),
        )
        .await;

    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_restore_replaces_datastore_and_takes_safety_snapshot() {
    let app = TestApp::new().await;
    let name = app.create_snapshot().await;
    std::fs::write(app.datastore(), b"edited after snapshot").unwrap();

    let response = app
        .request(
            "POST",
            &format!("/api/admin/backups/{name}/restore"),
            Some("ops"),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
    assert_eq!(response.body["message"], RESTART_NOTICE);
    assert_eq!(response.body["data"]["restart_required"], true);
    assert_eq!(response.body["data"]["restored_by"], "ops");
    assert_eq!(std::fs::read(app.datastore()).unwrap(), b"initial inventory");

    let safety = response.body["data"]["pre_restore_snapshot"]
        .as_str()
        .expect("no safety snapshot")
        .to_string();
    let list = app.request("GET", "/api/admin/backups", Some("ops")).await;
    assert_eq!(list.body["total"], 2);
    assert!(
        list.body["data"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s["name"] == safety.as_str())
    );
}

#[tokio::test]
async fn test_restore_of_corrupt_snapshot_is_rejected() {
    let app = TestApp::new().await;
    let name = app.create_snapshot().await;
    std::fs::write(app.datastore(), b"live rows").unwrap();
    corrupt_one_byte(&app.archive_path(&name));

    let response = app
        .request(
            "POST",
            &format!("/api/admin/backups/{name}/restore"),
            Some("ops"),
        )
        .await;

    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.body["error"], "INTEGRITY_ERROR");
    assert_eq!(std::fs::read(app.datastore()).unwrap(), b"live rows");
}

#[tokio::test]
async fn test_delete_twice() {
    let app = TestApp::new().await;
    let name = app.create_snapshot().await;
    let path = format!("/api/admin/backups/{name}");

    let first = app.request("DELETE", &path, Some("ops")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["data"]["archive_removed"], true);

    let second = app.request("DELETE", &path, Some("ops")).await;
    assert_eq!(second.status, StatusCode::NOT_FOUND);
}
