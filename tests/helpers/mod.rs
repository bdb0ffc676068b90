//! Shared fixtures for router tests

#![allow(dead_code)]

use std::sync::Arc;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use serde_json::Value;
use tempfile::TempDir;

use ephemera_server::catalog::Catalog;
use ephemera_server::config::Config;
use ephemera_server::db::{create_pool_at, SqliteCatalog};
use ephemera_server::routes;
use ephemera_server::state::AppState;

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        self.state.catalog()
    }

    pub fn artifact_path(&self, id: &str) -> std::path::PathBuf {
        self.state.uploads().finalizer().artifact_path(id)
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Build an in-process server over a temporary storage root and catalog
pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.server.base_url = "http://files.test".to_string();
    config.storage.root = dir.path().join("files");
    config.storage.chunk_dir = dir.path().join("chunks");
    config.upload.max_upload_size = 1024;
    configure(&mut config);

    let pool = create_pool_at(&dir.path().join("catalog.db")).await.unwrap();
    let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::new(pool));
    let state = AppState::new(config, catalog).unwrap();
    let server = TestServer::new(routes::app(state.clone())).unwrap();

    TestApp {
        server,
        state,
        _dir: dir,
    }
}

pub fn chunk_form(data: &[u8]) -> MultipartForm {
    MultipartForm::new().add_part("chunk", Part::bytes(data.to_vec()).file_name("blob"))
}

pub async fn init_upload(app: &TestApp, filename: &str, size: u64, chunk_size: u64) -> String {
    let response = app
        .server
        .post("/upload/init")
        .form(&[
            ("filename", filename.to_string()),
            ("size", size.to_string()),
            ("chunk_size", chunk_size.to_string()),
        ])
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    body["upload_id"].as_str().unwrap().to_string()
}

/// Single-shot upload; returns the response body
pub async fn upload_whole(app: &TestApp, filename: &str, data: &[u8], one_time_view: bool) -> Value {
    let mut form = MultipartForm::new()
        .add_part("file", Part::bytes(data.to_vec()).file_name(filename.to_string()));
    if one_time_view {
        form = form.add_text("one_time_view", "true");
    }
    let response = app.server.post("/upload").multipart(form).await;
    assert_eq!(response.status_code(), 200);
    response.json()
}

/// Resource ID from a `file_url`
pub fn id_from_url(body: &Value) -> String {
    body["file_url"]
        .as_str()
        .unwrap()
        .rsplit('/')
        .next()
        .unwrap()
        .to_string()
}
