//! API integration tests for device status tracking.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

use opdeck::monitor::DeviceId;

mod common;
use common::{absent, storage_mounted, test_app, upgrade_mounted, usb_other};

async fn get_json(router: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

/// Read the first `count` SSE data payloads from a streaming response body.
async fn read_sse_events(response: axum::response::Response, count: usize) -> Vec<Value> {
    let mut stream = response.into_body().into_data_stream();
    let mut buffer = String::new();
    let mut events = Vec::new();

    while events.len() < count {
        let chunk = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for SSE event")
            .expect("stream ended early")
            .expect("stream error");
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());

        while let Some(end) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..end + 2).collect();
            for line in frame.lines() {
                if let Some(data) = line.strip_prefix("data: ") {
                    events.push(serde_json::from_str(data).expect("valid JSON event"));
                }
            }
        }
    }

    events
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let (status, json) = get_json(app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_device_status_initially_disconnected() {
    let app = test_app();
    let (status, json) = get_json(app.router, "/device-status").await;

    assert_eq!(status, StatusCode::OK);
    for device in ["opz", "op1"] {
        assert_eq!(json[device]["connected"], false);
        assert_eq!(json[device]["mode"], "none");
        assert_eq!(json[device]["path"], Value::Null);
        assert_eq!(json[device]["usb_detected"], false);
    }
    assert_eq!(json["opz"]["device_name"], "OP-Z");
    assert_eq!(json["op1"]["device_name"], "OP-1");
}

#[tokio::test]
async fn test_refresh_scan_reports_mounted_device() {
    let app = test_app();
    app.prober.push(DeviceId::Opz, storage_mounted("/Volumes/OPZ"));

    let (status, json) = get_json(app.router.clone(), "/refresh-device-scan").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["opz"]["connected"], true);
    assert_eq!(json["opz"]["mode"], "storage");
    assert_eq!(json["opz"]["path"], "/Volumes/OPZ");
    assert_eq!(json["op1"]["connected"], false);

    // The point query agrees with the scan result.
    let (_, json) = get_json(app.router, "/device-status").await;
    assert_eq!(json["opz"]["path"], "/Volumes/OPZ");
}

#[tokio::test]
async fn test_stream_replay_matches_snapshot() {
    let app = test_app();
    app.prober.push(DeviceId::Opz, storage_mounted("/Volumes/OPZ"));
    app.prober.push(DeviceId::Op1, usb_other());
    app.monitor.scan_once().await;

    let (_, snapshot) = get_json(app.router.clone(), "/device-status").await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/device-events")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events = read_sse_events(response, 2).await;

    // One replay message per device, together identical to the snapshot.
    assert_eq!(events.len(), 2);
    for event in &events {
        assert_eq!(event["type"], "device_status");
        let device = event["device"].as_str().unwrap();
        assert_eq!(event["connected"], snapshot[device]["connected"]);
        assert_eq!(event["mode"], snapshot[device]["mode"]);
        assert_eq!(event["path"], snapshot[device]["path"]);
        assert_eq!(event["usb_detected"], snapshot[device]["usb_detected"]);
        assert_eq!(event["device_name"], snapshot[device]["device_name"]);
    }
    let devices: Vec<_> = events.iter().map(|e| e["device"].as_str().unwrap()).collect();
    assert!(devices.contains(&"opz") && devices.contains(&"op1"));
}

#[tokio::test]
async fn test_mount_transition_is_streamed_once() {
    let app = test_app();
    app.monitor.scan_once().await;

    let mut sub = app.hub.subscribe();
    // Drain the snapshot replay.
    sub.recv().await.unwrap();
    sub.recv().await.unwrap();

    // Device appears in storage mode at /Volumes/OPZ.
    app.prober.push(DeviceId::Opz, storage_mounted("/Volumes/OPZ"));
    app.monitor.scan_once().await;

    let msg = sub.recv().await.unwrap();
    let json: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
    assert_eq!(json["type"], "device_status");
    assert_eq!(json["device"], "opz");
    assert_eq!(json["connected"], true);
    assert_eq!(json["mode"], "storage");
    assert_eq!(json["path"], "/Volumes/OPZ");

    // Identical facts on following ticks emit nothing.
    app.monitor.scan_once().await;
    app.monitor.scan_once().await;
    assert!(
        tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_upgrade_transition_carries_no_path() {
    let app = test_app();
    app.prober.push(DeviceId::Opz, storage_mounted("/Volumes/OPZ"));
    app.monitor.scan_once().await;

    let mut sub = app.hub.subscribe();
    sub.recv().await.unwrap();
    sub.recv().await.unwrap();

    app.prober.push(DeviceId::Opz, upgrade_mounted("/Volumes/OPZ"));
    app.monitor.scan_once().await;

    let msg = sub.recv().await.unwrap();
    let json: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
    assert_eq!(json["mode"], "upgrade");
    assert_eq!(json["path"], Value::Null);
}

#[tokio::test]
async fn test_disconnect_after_mount_is_reported() {
    let app = test_app();
    app.prober.push(DeviceId::Op1, storage_mounted("/Volumes/OP1"));
    app.monitor.scan_once().await;

    // Grace window is zero in tests: the disconnect lands on the next cycle.
    app.prober.push(DeviceId::Op1, absent());
    app.monitor.scan_once().await;

    let (_, json) = get_json(app.router, "/device-status").await;
    assert_eq!(json["op1"]["connected"], false);
    assert_eq!(json["op1"]["mode"], "none");
    assert_eq!(json["op1"]["path"], Value::Null);
}

#[tokio::test]
async fn test_open_device_directory_without_path_is_not_found() {
    let app = test_app();
    let (status, json) = get_json(app.router, "/open-device-directory?device=opz").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_open_device_directory_rejects_unknown_device() {
    let app = test_app();
    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/open-device-directory?device=op9")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_subscriber_count_follows_connections() {
    let app = test_app();
    assert_eq!(app.hub.subscriber_count(), 0);
    let sub = app.hub.subscribe();
    assert_eq!(app.hub.subscriber_count(), 1);
    drop(sub);
    assert_eq!(app.hub.subscriber_count(), 0);
}
