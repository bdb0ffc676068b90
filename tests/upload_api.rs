//! Chunked and single-shot upload endpoints

mod helpers;

use axum_test::multipart::MultipartForm;
use serde_json::Value;

use helpers::{chunk_form, id_from_url, init_upload, spawn_app, spawn_app_with};

#[tokio::test]
async fn chunked_upload_completes_out_of_order() {
    let app = spawn_app().await;

    let response = app
        .server
        .post("/upload/init")
        .form(&[("filename", "digits.txt"), ("size", "10"), ("chunk_size", "5")])
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["total_chunks"], 2);
    assert_eq!(body["chunk_size"], 5);
    assert_eq!(body["uploaded_chunks"], serde_json::json!([]));
    let id = body["upload_id"].as_str().unwrap().to_string();

    let response = app
        .server
        .post(&format!("/upload/chunk/{}/1", id))
        .multipart(chunk_form(b"56789"))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["progress"], 50);
    assert!(body.get("token").is_none());

    let status: Value = app.server.get(&format!("/upload/status/{}", id)).await.json();
    assert_eq!(status["filename"], "digits.txt");
    assert_eq!(status["uploaded_chunks"], serde_json::json!([1]));
    assert_eq!(status["progress"], 50);

    let response = app
        .server
        .post(&format!("/upload/chunk/{}/0", id))
        .multipart(chunk_form(b"01234"))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["message"], "Upload completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["file_url"], format!("http://files.test/{}", id));
    assert_eq!(body["md5"], "781e5e245d69b566979b86e28d23f2c7");
    assert_eq!(body["sha256"].as_str().unwrap().len(), 64);
    assert!(!body["token"].as_str().unwrap().is_empty());
    assert!(body["expires_at"].is_string());
    assert!(body["expires_in_days"].as_f64().unwrap() > 29.0);

    let download = app.server.get(&format!("/{}", id)).await;
    assert_eq!(download.status_code(), 200);
    assert_eq!(download.as_bytes().as_ref(), b"0123456789");
    let disposition = download.header("content-disposition");
    assert!(disposition.to_str().unwrap().contains("digits.txt"));

    // Session is gone once finalized
    let status = app.server.get(&format!("/upload/status/{}", id)).await;
    assert_eq!(status.status_code(), 404);
}

#[tokio::test]
async fn retried_chunk_does_not_change_progress() {
    let app = spawn_app().await;
    let id = init_upload(&app, "a.bin", 15, 5).await;

    for _ in 0..2 {
        let body: Value = app
            .server
            .post(&format!("/upload/chunk/{}/2", id))
            .multipart(chunk_form(b"xxxxx"))
            .await
            .json();
        assert_eq!(body["progress"], 33);
    }
}

#[tokio::test]
async fn init_rejects_bad_input() {
    let app = spawn_app().await;

    let cases: Vec<Vec<(&str, &str)>> = vec![
        vec![("filename", "a.txt")],
        vec![("filename", "a.txt"), ("size", "-1")],
        vec![("filename", "a.txt"), ("size", "0")],
        vec![("filename", "a.txt"), ("size", "4096")],
        vec![("filename", "a.txt"), ("size", "10"), ("chunk_size", "0")],
        vec![("filename", "a.txt"), ("size", "10"), ("expires_at", "soon")],
        vec![("size", "10")],
    ];

    for form in cases {
        let response = app.server.post("/upload/init").form(&form).await;
        assert_eq!(response.status_code(), 400, "form {:?}", form);
        let body: Value = response.json();
        assert!(body["code"].is_string());
    }
}

#[tokio::test]
async fn init_without_body_is_a_validation_error() {
    let app = spawn_app().await;

    let response = app.server.post("/upload/init").await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn init_accepts_multipart_form() {
    let app = spawn_app().await;

    let form = MultipartForm::new()
        .add_text("filename", "a.txt")
        .add_text("size", "10")
        .add_text("chunk_size", "5");
    let response = app.server.post("/upload/init").multipart(form).await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["total_chunks"], 2);

    let id = body["upload_id"].as_str().unwrap();
    let status: Value = app.server.get(&format!("/upload/status/{}", id)).await.json();
    assert_eq!(status["filename"], "a.txt");

    let missing_size = MultipartForm::new().add_text("filename", "a.txt");
    let response = app.server.post("/upload/init").multipart(missing_size).await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn chunk_errors_map_to_status_codes() {
    let app = spawn_app().await;
    let id = init_upload(&app, "a.bin", 10, 5).await;

    let unknown = app
        .server
        .post("/upload/chunk/doesnotexist/0")
        .multipart(chunk_form(b"01234"))
        .await;
    assert_eq!(unknown.status_code(), 404);

    let unknown_bad_index = app
        .server
        .post("/upload/chunk/doesnotexist/first")
        .multipart(chunk_form(b"01234"))
        .await;
    assert_eq!(unknown_bad_index.status_code(), 404);
    let body: Value = unknown_bad_index.json();
    assert_eq!(body["code"], "SESSION_NOT_FOUND");

    let bad_index = app
        .server
        .post(&format!("/upload/chunk/{}/first", id))
        .multipart(chunk_form(b"01234"))
        .await;
    assert_eq!(bad_index.status_code(), 400);

    let out_of_range = app
        .server
        .post(&format!("/upload/chunk/{}/2", id))
        .multipart(chunk_form(b"01234"))
        .await;
    assert_eq!(out_of_range.status_code(), 400);

    let missing = app
        .server
        .post(&format!("/upload/chunk/{}/0", id))
        .multipart(MultipartForm::new().add_text("other", "value"))
        .await;
    assert_eq!(missing.status_code(), 400);
    let body: Value = missing.json();
    assert_eq!(body["code"], "MISSING_CHUNK");

    let oversized = app
        .server
        .post(&format!("/upload/chunk/{}/0", id))
        .multipart(chunk_form(b"0123456"))
        .await;
    assert_eq!(oversized.status_code(), 400);

    let status = app.server.get("/upload/status/doesnotexist").await;
    assert_eq!(status.status_code(), 404);
}

#[tokio::test]
async fn expired_session_is_gone_then_unknown() {
    let app = spawn_app_with(|config| config.upload.session_ttl_hours = -1).await;
    let id = init_upload(&app, "late.bin", 10, 5).await;

    let response = app
        .server
        .post(&format!("/upload/chunk/{}/0", id))
        .multipart(chunk_form(b"01234"))
        .await;
    assert_eq!(response.status_code(), 410);

    let response = app
        .server
        .post(&format!("/upload/chunk/{}/0", id))
        .multipart(chunk_form(b"01234"))
        .await;
    assert_eq!(response.status_code(), 404);

    let status = app.server.get(&format!("/upload/status/{}", id)).await;
    assert_eq!(status.status_code(), 404);
}

#[tokio::test]
async fn single_shot_upload_is_served() {
    let app = spawn_app().await;
    let body = helpers::upload_whole(&app, "hello.txt", b"hello world", false).await;
    let id = id_from_url(&body);

    assert_eq!(body["message"], "Upload completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["md5"], "5eb63bbbe01eeed093cb22bb8f5acdc3");

    let download = app.server.get(&format!("/{}", id)).await;
    assert_eq!(download.status_code(), 200);
    assert_eq!(download.as_bytes().as_ref(), b"hello world");
    assert_eq!(download.header("content-type").to_str().unwrap(), "text/plain");

    let record = app.catalog().get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.access_count, 1);
}

#[tokio::test]
async fn single_shot_upload_requires_file_part() {
    let app = spawn_app().await;
    let response = app
        .server
        .post("/upload")
        .multipart(MultipartForm::new().add_text("one_time_view", "true"))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn failed_merge_reports_500_without_paths() {
    let app = spawn_app().await;
    let id = init_upload(&app, "a.bin", 10, 5).await;

    app.server
        .post(&format!("/upload/chunk/{}/0", id))
        .multipart(chunk_form(b"01234"))
        .await;

    // A regular file where the storage root should be
    let root = app.state.config().storage.root.clone();
    std::fs::write(&root, b"").unwrap();

    let response = app
        .server
        .post(&format!("/upload/chunk/{}/1", id))
        .multipart(chunk_form(b"56789"))
        .await;
    assert_eq!(response.status_code(), 500);
    let body: Value = response.json();
    assert_eq!(body["code"], "STORAGE_ERROR");
    let error = body["error"].as_str().unwrap();
    assert!(!error.contains(root.to_str().unwrap()));
    assert!(!error.contains(&id));

    let status = app.server.get(&format!("/upload/status/{}", id)).await;
    assert_eq!(status.status_code(), 404);
    assert!(app.catalog().list_all().await.unwrap().is_empty());
}
