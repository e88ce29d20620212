//! API request handlers.

use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;

use axum::{
    Json,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::monitor::{DeviceId, SnapshotReport, storage_path};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Current status of both devices.
#[instrument(skip(state))]
pub async fn device_status(State(state): State<AppState>) -> Json<SnapshotReport> {
    Json(SnapshotReport::from(&state.hub.snapshot()))
}

/// SSE stream of device status updates.
///
/// The first messages replay the full current snapshot (one per device), then
/// each meaningful transition is delivered as its own message. The hub
/// subscription is released when the client disconnects.
pub async fn device_events(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();

    let stream = subscription.into_stream().map(|message| {
        let data = match serde_json::to_string(&message) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "failed to serialize status message");
                "{\"type\":\"error\"}".to_string()
            }
        };
        Ok(Event::default().data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// Probe both devices immediately and return the post-scan snapshot.
#[instrument(skip(state))]
pub async fn refresh_device_scan(State(state): State<AppState>) -> Json<SnapshotReport> {
    let snapshot = state.monitor.scan_once().await;
    Json(SnapshotReport::from(&snapshot))
}

fn default_device() -> DeviceId {
    DeviceId::Opz
}

#[derive(Debug, Deserialize)]
pub struct OpenDirectoryQuery {
    #[serde(default = "default_device")]
    pub device: DeviceId,
}

#[derive(Debug, Serialize)]
pub struct OpenDirectoryResponse {
    pub success: bool,
}

/// Open the device directory in the system file browser.
///
/// Uses the live mount path when the device is in storage mode; otherwise
/// falls back to the developer-mode override or the last persisted detected
/// path. The UI shows its own instructions when this returns 404.
#[instrument(skip(state))]
pub async fn open_device_directory(
    State(state): State<AppState>,
    Query(query): Query<OpenDirectoryQuery>,
) -> ApiResult<Json<OpenDirectoryResponse>> {
    let device = query.device;

    let snapshot = state.hub.snapshot();
    let path = match storage_path(snapshot.get(device)) {
        Some(path) => Some(path.to_path_buf()),
        None => state.settings.open_path_fallback(device).await,
    };

    let Some(path) = path else {
        return Err(ApiError::not_found(format!("no known path for {device}")));
    };
    if !path.exists() {
        return Err(ApiError::not_found(format!(
            "device path does not exist: {}",
            path.display()
        )));
    }

    open_in_file_browser(&path)
        .map_err(|err| ApiError::internal(format!("failed to open file browser: {err}")))?;

    info!(device = %device, path = %path.display(), "opened device directory");
    Ok(Json(OpenDirectoryResponse { success: true }))
}

fn open_in_file_browser(path: &Path) -> std::io::Result<()> {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    };
    tokio::process::Command::new(program)
        .arg(path)
        .spawn()
        .map(|_| ())
}
