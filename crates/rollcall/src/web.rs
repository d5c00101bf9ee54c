//! HTTP and WebSocket surface.
//!
//! ```text
//! GET  /                       discovery
//! GET  /api/health             health snapshot
//! POST /api/frames             submit a frame
//! POST /api/attendance         manual attendance (no cooldown)
//! GET  /api/attendance/today   today's records
//! GET  /api/devices            connected devices
//! GET  /api/entities           gallery entities
//! POST /api/gallery/reload     re-read the gallery file
//! GET  /ws/{device_id}         device session
//! ```

use crate::gallery::GalleryStore;
use crate::ledger::AttendanceLedger;
use crate::pipeline::{AttendanceOutcome, Frame, FramePayload, Pipeline};
use crate::pool::WorkerPool;
use crate::registry::DeviceRegistry;
use crate::session::{self, SessionContext};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rollconf::CorsConfig;
use rollproto::{
    DeviceId, FrameRequest, FrameResponse, HealthSnapshot, ManualAttendanceRequest,
    ManualAttendanceResponse,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

const DEVICE_ID_HEADER: &str = "x-device-id";

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DeviceRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub ledger: Arc<dyn AttendanceLedger>,
    pub gallery: Arc<GalleryStore>,
    pub pool: Arc<WorkerPool>,
    pub channel_capacity: usize,
    pub started_at: Instant,
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/api/health", get(health))
        .route("/api/frames", post(submit_frame))
        .route("/api/attendance", post(manual_attendance))
        .route("/api/attendance/today", get(attendance_today))
        .route("/api/devices", get(list_devices))
        .route("/api/entities", get(list_entities))
        .route("/api/gallery/reload", post(reload_gallery))
        .route("/ws/{device_id}", get(device_socket))
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if cors.allows_any() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Skipping invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Peer address when the server was started with connect info.
struct RemoteAddr(Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for RemoteAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

async fn serve_root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Rollcall",
        "version": env!("CARGO_PKG_VERSION"),
        "active_connections": state.registry.count(),
        "endpoints": {
            "health": "/api/health",
            "frames": "/api/frames",
            "attendance": "/api/attendance",
            "attendance_today": "/api/attendance/today",
            "devices": "/api/devices",
            "entities": "/api/entities",
            "gallery_reload": "/api/gallery/reload",
            "device_session": "/ws/{device_id}",
        }
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthSnapshot> {
    let gallery = state.gallery.snapshot();
    Json(HealthSnapshot {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        gallery_loaded: state.gallery.is_loaded(),
        gallery_size: gallery.len(),
        registered_device_count: state.registry.count(),
        registered_device_ids: state.registry.list_ids(),
        pool: state.pool.snapshot(),
    })
}

fn frame_status(outcome: &AttendanceOutcome) -> StatusCode {
    match outcome {
        AttendanceOutcome::ProcessingError(e) if e.is_decode() => StatusCode::BAD_REQUEST,
        AttendanceOutcome::ProcessingError(e) if e.is_store_unavailable() => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AttendanceOutcome::ProcessingError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

async fn submit_frame(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<FrameRequest>,
) -> (StatusCode, Json<FrameResponse>) {
    let device_id = request.device_id.or_else(|| {
        headers
            .get(DEVICE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(DeviceId::from)
    });
    let Some(device_id) = device_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(FrameResponse::error("device_id is required")),
        );
    };

    let traceparent = headers.get("traceparent").and_then(|v| v.to_str().ok());
    let span = crate::span_with_parent!(traceparent, "frame.process", device.id = %device_id);

    let frame = Frame::new(device_id, FramePayload::Base64(request.image));
    let outcome = state.pipeline.process(frame).instrument(span).await;

    let name = outcome
        .candidate()
        .and_then(|c| state.gallery.snapshot().name_of(c.entity_id).map(str::to_string));

    (frame_status(&outcome), Json(outcome.to_response().with_name(name)))
}

async fn manual_attendance(
    State(state): State<AppState>,
    Json(request): Json<ManualAttendanceRequest>,
) -> Response {
    if state.gallery.snapshot().name_of(request.entity_id).is_none() {
        return error_body(
            StatusCode::NOT_FOUND,
            format!("Entity {} is not in the gallery", request.entity_id),
        );
    }

    match state
        .ledger
        .commit_attendance(request.entity_id, request.device_id.as_ref())
        .await
    {
        Ok(result) => Json(ManualAttendanceResponse {
            success: true,
            entity_id: request.entity_id,
            result,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(entity.id = %request.entity_id, error = %e, "Manual attendance failed");
            error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

async fn attendance_today(State(state): State<AppState>) -> Response {
    match state.ledger.records_today().await {
        Ok(records) => Json(records).into_response(),
        Err(e) => error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn list_devices(State(state): State<AppState>) -> Response {
    let records = match state.ledger.records_today().await {
        Ok(records) => records,
        Err(e) => return error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };

    let mut devices = state.registry.devices();
    for device in &mut devices {
        device.last_recorded_at = records
            .iter()
            .filter(|r| r.device_id.as_ref() == Some(&device.device_id))
            .map(|r| r.recorded_at)
            .max();
    }
    Json(devices).into_response()
}

async fn list_entities(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.gallery.snapshot().entity_infos())
}

async fn reload_gallery(State(state): State<AppState>) -> Response {
    let gallery = state.gallery.clone();
    let reloaded = match state.pool.submit(move || gallery.reload()) {
        Ok(ticket) => ticket.await,
        Err(e) => Err(e),
    };

    match reloaded {
        Ok(Ok(count)) => Json(serde_json::json!({ "success": true, "entities": count })).into_response(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Gallery reload failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

async fn device_socket(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    RemoteAddr(remote_addr): RemoteAddr,
    ws: WebSocketUpgrade,
) -> Response {
    if device_id.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "device_id is required");
    }

    let ctx = SessionContext {
        registry: state.registry.clone(),
        channel_capacity: state.channel_capacity,
        shutdown: state.shutdown.clone(),
    };
    ws.on_upgrade(move |socket| session::run(socket, DeviceId::new(device_id), remote_addr, ctx))
}
