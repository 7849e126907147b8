//! WebSocket endpoint - role multiplexing
//!
//! Every connection declares its role via the `type` query parameter
//! (default browser) and is resolved into a tagged role once at upgrade
//! time. Binary JPEG frames are distinguished from text/JSON by magic
//! bytes, not framing metadata.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::connection_registry::{CameraInfo, ConnectionRole, Outbound, OutboundSender};
use crate::detection_processor::AiInbound;
use crate::realtime_hub::{
    CameraDisconnectedMessage, CameraInfoMessage, CameraListMessage, HubEvent,
};
use crate::state::AppState;

/// JPEG start-of-image magic bytes
const JPEG_MAGIC: [u8; 3] = [0xff, 0xd8, 0xff];

fn is_jpeg(data: &[u8]) -> bool {
    data.len() >= JPEG_MAGIC.len() && data[..JPEG_MAGIC.len()] == JPEG_MAGIC
}

/// Connection-time parameters
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Role: camera | browser | ai (default browser)
    #[serde(rename = "type")]
    kind: Option<String>,
    /// Pre-supplied camera id
    id: Option<String>,
}

/// Identifying message from a camera
#[derive(Debug, Deserialize)]
struct CameraMessage {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    position: Option<String>,
    description: Option<String>,
    resolution: Option<String>,
    address: Option<String>,
}

impl CameraMessage {
    fn info(&self) -> CameraInfo {
        CameraInfo {
            position: self.position.clone(),
            description: self.description.clone(),
            resolution: self.resolution.clone(),
            address: self.address.clone(),
        }
    }
}

/// Commands a browser may send
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BrowserCommand {
    GetCameraList,
    GetCameraInfo {
        #[serde(rename = "cameraId")]
        camera_id: String,
    },
    SubscribeSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let role = ConnectionRole::from_param(params.kind.as_deref());
    ws.on_upgrade(move |socket| handle_socket(socket, state, role, params.id))
}

/// Handle one connection for its lifetime
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    role: ConnectionRole,
    preset_camera_id: Option<String>,
) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    tracing::info!(connection_id = %conn_id, role = role.as_str(), "Socket connected");

    state.supervisor.register(conn_id, role, tx.clone()).await;

    match role {
        ConnectionRole::Browser => state.hub.register(conn_id, tx.clone()).await,
        ConnectionRole::Ai => {
            state.registry.set_ai(conn_id, tx.clone()).await;
            // A fresh worker starts with a clean error slate
            state.dispatcher.reset_errors().await;
        }
        ConnectionRole::Camera => {
            if let Some(id) = preset_camera_id.as_deref() {
                state
                    .registry
                    .register_camera(id, conn_id, tx.clone(), CameraInfo::default())
                    .await;
            }
        }
    }

    // Forward the ordered outbound channel onto the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let result = match out {
                Outbound::Text(text) => sender.send(Message::Text(text)).await,
                Outbound::Binary(data) => sender.send(Message::Binary(data)).await,
                Outbound::Ping => sender.send(Message::Ping(Vec::new())).await,
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_tx = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        // Established camera id; first identifying message wins
        let mut camera_id = preset_camera_id;

        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Binary(data)) => {
                    handle_binary(&recv_state, role, camera_id.as_deref(), data).await;
                }
                Ok(Message::Text(text)) => {
                    handle_text(&recv_state, role, &conn_id, &recv_tx, &mut camera_id, &text)
                        .await;
                }
                Ok(Message::Pong(_)) => {
                    recv_state.supervisor.mark_alive(&conn_id).await;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by axum
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, role = role.as_str(), "Peer closed connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Role-specific cleanup, shared by normal close and keepalive kill
    match role {
        ConnectionRole::Camera => {
            if let Some(camera_id) = state.registry.remove_by_conn(&conn_id).await {
                state.ingest.remove(&camera_id).await;
                state
                    .hub
                    .broadcast_event(
                        None,
                        HubEvent::CameraDisconnected(CameraDisconnectedMessage { id: camera_id }),
                    )
                    .await;
            }
        }
        ConnectionRole::Browser => state.hub.unregister(&conn_id).await,
        ConnectionRole::Ai => {
            state.registry.clear_ai(&conn_id).await;
        }
    }
    state.supervisor.deregister(&conn_id).await;
    tracing::info!(connection_id = %conn_id, role = role.as_str(), "Socket closed");
}

/// Binary frames: camera JPEG ingest -> relay -> session-gated dispatch
async fn handle_binary(state: &AppState, role: ConnectionRole, camera_id: Option<&str>, data: Vec<u8>) {
    if !is_jpeg(&data) {
        tracing::warn!(role = role.as_str(), bytes = data.len(), "Discarding non-JPEG binary message");
        return;
    }

    if role != ConnectionRole::Camera {
        tracing::warn!(role = role.as_str(), "Ignoring binary frame from non-camera role");
        return;
    }

    let camera_id = match camera_id {
        Some(id) => id,
        None => {
            tracing::warn!("Dropping frame from unidentified camera");
            return;
        }
    };

    state.ingest.store(camera_id, data.clone()).await;

    // Live relay is never session-gated
    state.hub.relay_frame(camera_id, data.clone()).await;

    // Inference is: outside a session frames are never dispatched
    if let Some(session_id) = state.sessions.active_id().await {
        if let Some(ai_tx) = state.registry.ai_sender().await {
            state
                .dispatcher
                .dispatch(camera_id, &data, &session_id, &ai_tx)
                .await;
        }
    }
}

/// Text frames: role-specific JSON protocol
async fn handle_text(
    state: &AppState,
    role: ConnectionRole,
    conn_id: &Uuid,
    tx: &OutboundSender,
    camera_id: &mut Option<String>,
    text: &str,
) {
    match role {
        ConnectionRole::Camera => handle_camera_text(state, conn_id, tx, camera_id, text).await,
        ConnectionRole::Browser => handle_browser_text(state, conn_id, text).await,
        ConnectionRole::Ai => handle_ai_text(state, conn_id, text).await,
    }
}

async fn handle_camera_text(
    state: &AppState,
    conn_id: &Uuid,
    tx: &OutboundSender,
    camera_id: &mut Option<String>,
    text: &str,
) {
    let msg: CameraMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(connection_id = %conn_id, error = %e, "Malformed camera message, discarding");
            return;
        }
    };

    match (camera_id.clone(), &msg.id) {
        (None, Some(id)) => {
            // First identifying message establishes the id
            *camera_id = Some(id.clone());
            state
                .registry
                .register_camera(id, *conn_id, tx.clone(), msg.info())
                .await;
        }
        (Some(established), Some(id)) if established.as_str() != id.as_str() => {
            tracing::warn!(
                connection_id = %conn_id,
                established = %established,
                claimed = %id,
                "Ignoring attempt to rebind camera id; first-seen wins"
            );
        }
        (Some(established), _) => {
            if msg.kind.as_deref() == Some("camera_info") {
                state.registry.update_info(&established, msg.info()).await;
            }
        }
        (None, None) => {
            tracing::warn!(connection_id = %conn_id, "Camera message without an id, still unidentified");
        }
    }
}

async fn handle_browser_text(state: &AppState, conn_id: &Uuid, text: &str) {
    let command: BrowserCommand = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(connection_id = %conn_id, error = %e, "Unrecognized browser command, discarding");
            return;
        }
    };

    match command {
        BrowserCommand::GetCameraList => {
            let cameras = state.registry.list().await;
            state
                .hub
                .send_to(conn_id, HubEvent::CameraList(CameraListMessage { cameras }))
                .await;
        }
        BrowserCommand::GetCameraInfo { camera_id } => {
            let camera = state.registry.get(&camera_id).await;
            state
                .hub
                .send_to(conn_id, HubEvent::CameraInfo(CameraInfoMessage { camera_id, camera }))
                .await;
        }
        BrowserCommand::SubscribeSession { session_id } => {
            state.hub.subscribe(conn_id, session_id).await;
        }
    }
}

async fn handle_ai_text(state: &AppState, conn_id: &Uuid, text: &str) {
    let inbound: AiInbound = match serde_json::from_str(text) {
        Ok(i) => i,
        Err(e) => {
            tracing::warn!(connection_id = %conn_id, error = %e, "Malformed AI message, discarding");
            return;
        }
    };

    match inbound {
        AiInbound::AiConnected { message } => {
            tracing::info!(connection_id = %conn_id, message = ?message, "AI worker handshake");
        }
        AiInbound::DetectionResponse { camera_id, results } => {
            state.processor.process_response(camera_id, results).await;
        }
        AiInbound::Error { message } => {
            state.processor.process_error(message).await;
        }
        AiInbound::Pong { .. } => {
            state.supervisor.mark_alive(conn_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_magic_sniffing() {
        assert!(is_jpeg(&[0xff, 0xd8, 0xff, 0xe0, 0x00]));
        assert!(!is_jpeg(&[0xff, 0xd8]));
        assert!(!is_jpeg(b"{\"type\":\"camera_info\"}"));
        assert!(!is_jpeg(&[]));
    }

    #[test]
    fn test_browser_command_parsing() {
        let cmd: BrowserCommand = serde_json::from_str("{\"type\":\"get_camera_list\"}").unwrap();
        assert!(matches!(cmd, BrowserCommand::GetCameraList));

        let cmd: BrowserCommand =
            serde_json::from_str("{\"type\":\"subscribe_session\",\"sessionId\":\"S\"}").unwrap();
        match cmd {
            BrowserCommand::SubscribeSession { session_id } => assert_eq!(session_id, "S"),
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(serde_json::from_str::<BrowserCommand>("{\"type\":\"nope\"}").is_err());
    }

    #[test]
    fn test_camera_message_parsing() {
        let msg: CameraMessage = serde_json::from_str(
            "{\"id\":\"cam1\",\"type\":\"camera_info\",\"resolution\":\"640x480\"}",
        )
        .unwrap();
        assert_eq!(msg.id.as_deref(), Some("cam1"));
        assert_eq!(msg.kind.as_deref(), Some("camera_info"));
        assert_eq!(msg.info().resolution.as_deref(), Some("640x480"));
    }

    #[test]
    fn test_ai_inbound_parsing() {
        let inbound: AiInbound = serde_json::from_str(
            "{\"type\":\"detection_response\",\"camera_id\":\"cam1\",\"results\":{\"detections\":[],\"inference_time\":0.03,\"image_size\":[480,640]}}",
        )
        .unwrap();
        assert!(matches!(inbound, AiInbound::DetectionResponse { .. }));

        // Absent results block must still parse so the slot gets settled
        let inbound: AiInbound = serde_json::from_str("{\"type\":\"detection_response\"}").unwrap();
        assert!(matches!(inbound, AiInbound::DetectionResponse { .. }));

        let inbound: AiInbound = serde_json::from_str("{\"type\":\"pong\",\"timestamp\":1.0}").unwrap();
        assert!(matches!(inbound, AiInbound::Pong { .. }));

        let inbound: AiInbound = serde_json::from_str("{\"type\":\"error\",\"message\":\"x\"}").unwrap();
        assert!(matches!(inbound, AiInbound::Error { .. }));
    }
}
