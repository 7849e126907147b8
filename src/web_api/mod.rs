//! WebAPI - HTTP Control Surface + WebSocket Endpoint
//!
//! ## Responsibilities
//!
//! - Session control routes and diagnostic snapshots
//! - WebSocket upgrade and role multiplexing

mod routes;
mod ws;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::{HealthResponse, StatusSnapshot};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        ai_socket_connected: state.registry.ai_connected().await,
        ai_worker_healthy: state.ai_monitor.is_healthy(),
    };

    Json(response)
}

/// Diagnostic snapshot of counts and flags
pub async fn hub_status(State(state): State<AppState>) -> impl IntoResponse {
    let dispatch = state.dispatcher.snapshot().await;
    let health = state.system_health.read().await.clone();

    Json(StatusSnapshot {
        cameras_connected: state.registry.camera_count().await,
        browsers_connected: state.hub.browser_count().await,
        ai_connected: state.registry.ai_connected().await,
        active_session_id: state.sessions.active_id().await,
        detection_enabled: dispatch.enabled,
        in_flight_requests: dispatch.in_flight,
        consecutive_ai_errors: dispatch.consecutive_errors,
        requests_this_minute: dispatch.requests_this_minute,
        camera_fps: state.ingest.fps_snapshot().await,
        cpu_percent: health.cpu_percent,
        memory_percent: health.memory_percent,
    })
}
