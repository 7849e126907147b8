//! API Routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::hub_status))
        // Sessions
        .route("/api/session/start", post(start_session))
        .route("/api/session/end", post(end_session))
        .route("/api/sessions", get(list_sessions))
        .route("/api/session/:id/data", get(session_data))
        .route("/api/session/:id/detections", get(session_detections))
        // Cameras
        .route("/api/camera/:id/frame", get(camera_frame))
        // WebSocket
        .route("/ws", get(super::ws::websocket_handler))
        .with_state(state)
}

// ========================================
// Camera Handlers
// ========================================

/// GET /api/camera/:id/frame
///
/// Most recent buffered JPEG for a camera; 404 until one has arrived.
async fn camera_frame(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let frame = state
        .ingest
        .latest(&id)
        .await
        .ok_or_else(|| crate::error::Error::NotFound(format!("no buffered frame for camera {id}")))?;

    Ok(([("content-type", "image/jpeg")], frame.data))
}

// ========================================
// Session Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    duration: u32,
    count: u32,
}

/// POST /api/session/start
///
/// 409 Conflict when a session is already active.
async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<impl IntoResponse> {
    let session = state.sessions.start(req.duration, req.count).await?;
    Ok(Json(json!({ "sessionId": session.id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionRequest {
    session_id: String,
}

/// POST /api/session/end
///
/// 400 Bad Request when the id does not match the active session.
async fn end_session(
    State(state): State<AppState>,
    Json(req): Json<EndSessionRequest>,
) -> Result<impl IntoResponse> {
    let session = state.sessions.end(&req.session_id).await?;
    Ok(Json(ApiResponse::success(session)))
}

/// GET /api/sessions
async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.store.list_sessions().await;
    Json(ApiResponse::success(sessions))
}

/// GET /api/session/:id/data
async fn session_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let session = state
        .store
        .get_session(&id)
        .await
        .ok_or_else(|| crate::error::Error::NotFound(format!("session {id}")))?;

    let detection_count = state.store.detection_count(&id).await;
    let recent = state.processor.recent(&id, 50).await;

    Ok(Json(ApiResponse::success(json!({
        "session": session,
        "detectionCount": detection_count,
        "recentDetections": recent,
    }))))
}

#[derive(Debug, Deserialize)]
struct DetectionQuery {
    limit: Option<usize>,
    skip: Option<usize>,
}

/// GET /api/session/:id/detections?limit&skip
async fn session_detections(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DetectionQuery>,
) -> Result<impl IntoResponse> {
    if state.store.get_session(&id).await.is_none() {
        return Err(crate::error::Error::NotFound(format!("session {id}")));
    }

    let limit = query.limit.unwrap_or(100).min(1000);
    let skip = query.skip.unwrap_or(0);
    let detections = state.store.get_detections(&id, limit, skip).await;

    Ok(Json(ApiResponse::success(json!({
        "sessionId": id,
        "limit": limit,
        "skip": skip,
        "detections": detections,
    }))))
}
