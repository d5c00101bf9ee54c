//! Frame submission over HTTP, end to end through the pipeline.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use pretty_assertions::assert_eq;
use rollcall::registry;
use rollproto::{
    CommitOutcome, DeviceId, FrameResponse, FrameStatus, HealthSnapshot, IndicatorColor,
    ManualAttendanceResponse, ServerMessage,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    post_json_with(app, uri, body, &[]).await
}

async fn post_json_with(
    app: axum::Router,
    uri: &str,
    body: Value,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let response = app
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn frame(device: &str, width: u32) -> Value {
    json!({ "device_id": device, "image": png_b64(width, 4) })
}

fn connect(app: &TestApp, device: &str) -> tokio::sync::mpsc::Receiver<ServerMessage> {
    let (channel, rx) = registry::channel(8);
    app.registry.register(DeviceId::new(device), channel, None);
    rx
}

#[tokio::test]
async fn test_unknown_face_sends_negative_indicator() {
    let app = TestApp::new();
    let mut rx = connect(&app, "cam-1");

    let (status, body) = post_json(app.router(), "/api/frames", frame("cam-1", STRANGER_WIDTH)).await;

    assert_eq!(status, StatusCode::OK);
    let response: FrameResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.status, FrameStatus::Unknown);
    assert_eq!(response.faces_found, Some(1));
    assert_eq!(
        rx.recv().await,
        Some(ServerMessage::LedControl {
            color: IndicatorColor::Red,
            duration: 1
        })
    );
}

#[tokio::test]
async fn test_first_recognition_commits_and_sends_positive_indicator() {
    let app = TestApp::new();
    let mut rx = connect(&app, "cam-1");

    let (status, body) = post_json(app.router(), "/api/frames", frame("cam-1", ADA.0 as u32)).await;

    assert_eq!(status, StatusCode::OK);
    let response: FrameResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.status, FrameStatus::Recognized);
    assert_eq!(response.entity_id, Some(ADA));
    assert_eq!(response.name.as_deref(), Some("Ada Lovelace"));
    assert_eq!(response.committed, Some(true));
    assert_eq!(response.result, Some(CommitOutcome::New));
    assert_eq!(
        rx.recv().await,
        Some(ServerMessage::LedControl {
            color: IndicatorColor::Green,
            duration: 2
        })
    );
}

#[tokio::test]
async fn test_repeat_within_cooldown_is_not_committed() {
    let app = TestApp::new();
    let mut rx = connect(&app, "cam-1");

    post_json(app.router(), "/api/frames", frame("cam-1", ADA.0 as u32)).await;
    assert!(rx.recv().await.is_some());

    app.clock.advance(Duration::from_secs(60));
    let (status, body) = post_json(app.router(), "/api/frames", frame("cam-1", ADA.0 as u32)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "recognized");
    assert_eq!(body["committed"], false);
    assert_eq!(body["entity_id"], ADA.0);
    assert!(body.get("result").is_none());
    assert!(rx.try_recv().is_err(), "cooldown must not send a directive");
}

#[tokio::test]
async fn test_undecodable_frame_is_bad_request_without_dispatch() {
    let app = TestApp::new();
    let mut rx = connect(&app, "cam-1");

    let (status, body) = post_json(
        app.router(),
        "/api/frames",
        json!({ "device_id": "cam-1", "image": "bm90IGFuIGltYWdl" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert_eq!(app.state.pool.snapshot().in_flight, 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(app.state.pipeline.stats().errors, 1);
}

#[tokio::test]
async fn test_no_face_sends_nothing() {
    let app = TestApp::new();
    let mut rx = connect(&app, "cam-1");

    let (status, body) = post_json(app.router(), "/api/frames", frame("cam-1", NO_FACE_WIDTH)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_face");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_device_id_header_fallback() {
    let app = TestApp::new();
    let mut rx = connect(&app, "hall-door");

    let (status, body) = post_json_with(
        app.router(),
        "/api/frames",
        json!({ "image": png_b64(GRACE.0 as u32, 4) }),
        &[("x-device-id", "hall-door")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entity_id"], GRACE.0);
    assert!(rx.recv().await.is_some());

    let records = app.state.ledger.records_today().await.unwrap();
    assert_eq!(records[0].device_id, Some(DeviceId::new("hall-door")));
}

#[tokio::test]
async fn test_missing_device_id_is_rejected() {
    let app = TestApp::new();
    let (status, body) = post_json(app.router(), "/api/frames", json!({ "image": png_b64(10, 4) })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_store_unavailable_is_503() {
    let app = TestApp::with_ledger(Arc::new(DownLedger));
    let mut rx = connect(&app, "cam-1");

    let (status, body) = post_json(app.router(), "/api/frames", frame("cam-1", ADA.0 as u32)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("unavailable"));
    assert!(rx.try_recv().is_err(), "store errors send no directive");
}

#[tokio::test]
async fn test_matcher_fault_is_500_and_pool_survives() {
    let app = TestApp::new();

    let (status, body) = post_json(
        app.router(),
        "/api/frames",
        json!({ "device_id": "cam-1", "image": png_b64(ADA.0 as u32, PANIC_HEIGHT) }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");

    let (status, body) = post_json(app.router(), "/api/frames", frame("cam-1", ADA.0 as u32)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], true);
}

#[tokio::test]
async fn test_offline_device_still_commits() {
    let app = TestApp::new();
    let (status, body) = post_json(app.router(), "/api/frames", frame("unplugged", ADA.0 as u32)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["committed"], true);
}

#[tokio::test]
async fn test_manual_attendance_ignores_cooldown() {
    let app = TestApp::new();
    post_json(app.router(), "/api/frames", frame("cam-1", ADA.0 as u32)).await;
    app.clock.advance(Duration::from_secs(5));

    let (status, body) = post_json(
        app.router(),
        "/api/attendance",
        json!({ "entity_id": ADA.0, "device_id": "front-desk" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response: ManualAttendanceResponse = serde_json::from_value(body).unwrap();
    assert!(response.success);
    assert_eq!(response.result, CommitOutcome::Updated);

    let (status, _) = post_json(app.router(), "/api/attendance", json!({ "entity_id": 999 })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_read_endpoints() {
    let app = TestApp::new();
    let _rx = connect(&app, "lab-2");
    post_json(app.router(), "/api/frames", frame("lab-2", GRACE.0 as u32)).await;

    let (status, today) = get_json(app.router(), "/api/attendance/today").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(today.as_array().unwrap().len(), 1);
    assert_eq!(today[0]["entity_id"], GRACE.0);

    let (_, devices) = get_json(app.router(), "/api/devices").await;
    assert_eq!(devices[0]["device_id"], "lab-2");
    assert!(devices[0]["last_recorded_at"].is_string());

    let (_, entities) = get_json(app.router(), "/api/entities").await;
    assert_eq!(entities.as_array().unwrap().len(), 2);
    assert_eq!(entities[0]["name"], "Ada Lovelace");

    let (_, root) = get_json(app.router(), "/").await;
    assert_eq!(root["name"], "Rollcall");
    assert_eq!(root["active_connections"], 1);
}

#[tokio::test]
async fn test_health_reports_registry() {
    let app = TestApp::new();
    let _a = connect(&app, "cam-b");
    let _b = connect(&app, "cam-a");

    let (status, body) = get_json(app.router(), "/api/health").await;
    assert_eq!(status, StatusCode::OK);

    let health: HealthSnapshot = serde_json::from_value(body).unwrap();
    assert_eq!(health.status, "healthy");
    assert_eq!(health.registered_device_count, 2);
    let ids: Vec<_> = health.registered_device_ids.iter().map(|d| d.as_str()).collect();
    assert_eq!(ids, vec!["cam-a", "cam-b"]);
    assert_eq!(health.gallery_size, 2);
    assert_eq!(health.pool.capacity, 2);
}

#[tokio::test]
async fn test_gallery_reload_failure_is_reported() {
    let app = TestApp::new();
    let (status, body) = post_json(app.router(), "/api/gallery/reload", json!({})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    // Current gallery stays in place
    assert_eq!(app.state.gallery.snapshot().len(), 2);
}
