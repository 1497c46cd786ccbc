mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use time::macros::datetime;
use tower::ServiceExt;

use common::*;
use shelfscan::server::create_router;

const BOUNDARY: &str = "shelfscan-test-boundary";

fn multipart_request(field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/detect")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .expect("valid request")
}

async fn json_body(response: axum::response::Response) -> anyhow::Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn test_health() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(Vec::new()));
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    let app = create_router(service, None);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "Service is running");
    Ok(())
}

#[tokio::test]
async fn test_detect_upload_returns_boxes_and_records_event() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(three_books()));
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    let store = service.store().clone();
    let uploads = service.uploads_dir().to_path_buf();
    let app = create_router(service, None);

    let jpeg = encode_jpeg(&shelf_image(200, 120));
    let response = app.oneshot(multipart_request("file", "shelf.jpg", &jpeg)).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "success");
    assert_eq!(body["count"], 3);
    assert_eq!(body["boxes"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["boxes"][0], serde_json::json!([10, 20, 40, 110]));
    assert!(body["image_with_boxes"].as_str().is_some_and(|s| !s.is_empty()));

    assert_eq!(store.count().await?, 1);
    let event = store.latest().await?.expect("recorded event");
    assert!(event.source_ref.ends_with(".jpg"));
    assert!(std::path::Path::new(&event.source_ref).starts_with(&uploads));
    Ok(())
}

#[tokio::test]
async fn test_detect_rejects_undecodable_upload() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(three_books()));
    let (service, _dir) = create_test_service(backend.clone(), 1, Duration::from_secs(5)).await;
    let store = service.store().clone();
    let app = create_router(service, None);

    let response = app
        .oneshot(multipart_request("file", "notes.jpg", b"not an image at all"))
        .await?;

    assert!(response.status().is_client_error());
    let body = json_body(response).await?;
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().is_some_and(|m| m.contains("decode")));
    assert_eq!(backend.calls(), 0);
    assert_eq!(store.count().await?, 0);
    Ok(())
}

fn stored_uploads(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_rejected_upload_leaves_no_file_behind() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(three_books()));
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    let uploads = service.uploads_dir().to_path_buf();
    let app = create_router(service, None);

    let response = app
        .clone()
        .oneshot(multipart_request("file", "notes.jpg", b"not an image at all"))
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(stored_uploads(&uploads), 0);

    let jpeg = encode_jpeg(&shelf_image(200, 120));
    let response = app.oneshot(multipart_request("file", "shelf.jpg", &jpeg)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(stored_uploads(&uploads), 1);
    Ok(())
}

#[tokio::test]
async fn test_detect_without_file_is_bad_request() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(three_books()));
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    let app = create_router(service, None);

    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"comment\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/detect")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))?;

    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await?["status"], "error");
    Ok(())
}

#[tokio::test]
async fn test_inference_failure_is_server_error() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::failing());
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    let app = create_router(service, None);

    let jpeg = encode_jpeg(&shelf_image(64, 64));
    let response = app.oneshot(multipart_request("file", "shelf.jpg", &jpeg)).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await?["status"], "error");
    Ok(())
}

#[tokio::test]
async fn test_stats_returns_parallel_arrays() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(Vec::new()));
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    let now = time::OffsetDateTime::now_utc();
    service.store().append_at(now - time::Duration::days(30), 1, "old.jpg").await?;
    service.store().append_at(now - time::Duration::hours(2), 4, "a.jpg").await?;
    service.store().append_at(now - time::Duration::hours(1), 6, "b.jpg").await?;
    let app = create_router(service, None);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/stats").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "success");
    assert_eq!(body["counts"], serde_json::json!([4, 6]));
    assert_eq!(body["timestamps"].as_array().map(Vec::len), Some(2));

    let response = app
        .oneshot(Request::builder().uri("/stats?days=60").body(Body::empty())?)
        .await?;
    let body = json_body(response).await?;
    assert_eq!(body["counts"], serde_json::json!([1, 4, 6]));
    Ok(())
}

#[tokio::test]
async fn test_stats_timestamps_are_rfc3339() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(Vec::new()));
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    service.store().append_at(datetime!(2000-01-01 00:00 UTC), 2, "y2k.jpg").await?;
    let app = create_router(service, None);

    let response = app
        .oneshot(Request::builder().uri("/stats?days=100000").body(Body::empty())?)
        .await?;
    let body = json_body(response).await?;
    assert_eq!(body["timestamps"], serde_json::json!(["2000-01-01T00:00:00Z"]));
    Ok(())
}

#[tokio::test]
async fn test_stats_with_zero_days_is_empty() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(Vec::new()));
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    service.store().append(3, "now.jpg").await?;
    let app = create_router(service, None);

    let response = app
        .oneshot(Request::builder().uri("/stats?days=0").body(Body::empty())?)
        .await?;
    let body = json_body(response).await?;
    assert_eq!(body["counts"], serde_json::json!([]));
    Ok(())
}

#[tokio::test]
async fn test_stats_with_malformed_days_uses_error_envelope() -> anyhow::Result<()> {
    let backend = Arc::new(FixedBackend::new(Vec::new()));
    let (service, _dir) = create_test_service(backend, 1, Duration::from_secs(5)).await;
    let app = create_router(service, None);

    let response = app
        .oneshot(Request::builder().uri("/stats?days=abc").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
    Ok(())
}
