//! Shared test helpers for integration tests.

use std::path::{Path, PathBuf};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use invhub_backup::BackupManager;
use invhub_core::config::{AppConfig, BackupConfig};

/// Actor header sent by [`TestApp::request`].
pub const ACTOR_HEADER: &str = "x-invhub-actor";

/// Backup configuration rooted in `dir`.
pub fn backup_config(dir: &Path, prefix: &str) -> BackupConfig {
    BackupConfig {
        archive_dir: dir.join("backups").display().to_string(),
        datastore_path: dir.join("data/inventory.db").display().to_string(),
        name_prefix: prefix.to_string(),
        pre_restore_snapshot: false,
        ..BackupConfig::default()
    }
}

/// Deterministic, poorly compressible bytes.
pub fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// Write `content` to the datastore path of `config`, creating its directory.
pub fn write_datastore(config: &BackupConfig, content: &[u8]) {
    let path = PathBuf::from(&config.datastore_path);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Flip one byte in the middle of a file.
pub fn corrupt_one_byte(path: &Path) {
    let mut bytes = std::fs::read(path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x5a;
    std::fs::write(path, bytes).unwrap();
}

/// Test application context
pub struct TestApp {
    /// The Axum router for making test requests
    pub router: Router,
    /// Application config
    pub config: AppConfig,
    /// Owns the Archive Store and datastore for the test's lifetime
    pub dir: TempDir,
}

impl TestApp {
    /// Create a new test application with no admin token
    pub async fn new() -> Self {
        Self::with_token("").await
    }

    /// Create a new test application requiring `token` on admin routes
    pub async fn with_token(token: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        let mut config = AppConfig::default();
        config.backup = backup_config(dir.path(), "inventory");
        config.backup.pre_restore_snapshot = true;
        config.admin.token = token.to_string();

        write_datastore(&config.backup, b"initial inventory");

        let manager = BackupManager::open(&config.backup)
            .await
            .expect("Failed to open backup manager");
        let state = invhub_api::AppState::new(config.clone(), manager);
        let router = invhub_api::build_router(state);

        Self {
            router,
            config,
            dir,
        }
    }

    /// Live datastore path
    pub fn datastore(&self) -> PathBuf {
        PathBuf::from(&self.config.backup.datastore_path)
    }

    /// Make a JSON request as `actor`
    pub async fn request(&self, method: &str, path: &str, actor: Option<&str>) -> TestResponse {
        self.request_with_token(method, path, actor, None).await
    }

    /// Make a JSON request as `actor` with a bearer token
    pub async fn request_with_token(
        &self,
        method: &str,
        path: &str,
        actor: Option<&str>,
        token: Option<&str>,
    ) -> TestResponse {
        let (status, headers, body_bytes) = self.send(method, path, actor, token).await;
        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Make a request and return the raw body
    pub async fn send(
        &self,
        method: &str,
        path: &str,
        actor: Option<&str>,
        token: Option<&str>,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let mut req = Request::builder().method(method).uri(path);

        if let Some(actor) = actor {
            req = req.header(ACTOR_HEADER, actor);
        }
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let req = req.body(Body::empty()).expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = axum::body::to_bytes(response.into_body(), 64 * 1024 * 1024)
            .await
            .expect("Failed to read body");

        (status, headers, body_bytes)
    }

    /// Create a snapshot through the API and return its name
    pub async fn create_snapshot(&self) -> String {
        let response = self.request("POST", "/api/admin/backups", Some("ops")).await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "Create failed: {:?}",
            response.body
        );
        response.body["data"]["name"]
            .as_str()
            .expect("No name in create response")
            .to_string()
    }

    /// Archive path of snapshot `name`
    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("backups").join(format!("{name}.db.gz"))
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Parsed JSON body
    pub body: Value,
}
