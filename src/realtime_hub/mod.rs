//! RealtimeHub - Browser Fan-out
//!
//! ## Responsibilities
//!
//! - Browser connection management with optional session subscription
//! - Raw video relay (frame_metadata + binary JPEG), rate-capped per
//!   camera, always active regardless of session state
//! - Session-scoped event distribution (detections, traffic, session
//!   status): a subscribed browser only receives events tagged with its
//!   session id; unsubscribed browsers receive everything
//!
//! Every send is isolated per recipient: a failure sending to one
//! browser never aborts delivery to the others.

use crate::connection_registry::{CameraSummary, Outbound, OutboundSender};
use crate::detection_processor::{Detection, TrafficAnalysis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// Hub event types on the browser wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    DetectionResults(DetectionResultsMessage),
    SessionStatus(SessionStatusMessage),
    TrafficRedirection(TrafficRedirectionMessage),
    CameraDisconnected(CameraDisconnectedMessage),
    CameraList(CameraListMessage),
    CameraInfo(CameraInfoMessage),
}

impl HubEvent {
    fn name(&self) -> &'static str {
        match self {
            HubEvent::DetectionResults(_) => "detection_results",
            HubEvent::SessionStatus(_) => "session_status",
            HubEvent::TrafficRedirection(_) => "traffic_redirection",
            HubEvent::CameraDisconnected(_) => "camera_disconnected",
            HubEvent::CameraList(_) => "camera_list",
            HubEvent::CameraInfo(_) => "camera_info",
        }
    }
}

/// Detection results for one processed frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResultsMessage {
    pub camera_id: String,
    pub detections: Vec<Detection>,
    pub vehicle_count: u32,
    pub person_count: u32,
    pub session_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_analysis: Option<TrafficAnalysis>,
}

/// Session lifecycle announcement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusMessage {
    pub session_id: String,
    /// "active" or "completed"
    pub status: String,
    pub duration_minutes: u32,
    pub target_count: u32,
}

/// Traffic redirection suggestion derived from density classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficRedirectionMessage {
    pub camera_id: String,
    /// Density tier: "low", "moderate" or "high"
    pub status: String,
    pub alternative_routes: Vec<String>,
    pub session_id: String,
}

/// Camera gone notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDisconnectedMessage {
    pub id: String,
}

/// Reply to a browser's get_camera_list command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraListMessage {
    pub cameras: Vec<CameraSummary>,
}

/// Reply to a browser's get_camera_info command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfoMessage {
    pub camera_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<CameraSummary>,
}

/// Metadata text frame preceding each relayed binary frame
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMetadata {
    #[serde(rename = "type")]
    pub kind: String,
    pub camera_id: String,
    pub timestamp: String,
    pub size: usize,
}

/// Browser connection
struct BrowserConnection {
    tx: OutboundSender,
    /// Session filter; absent = global observer receiving everything
    subscribed_session: Option<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    browsers: RwLock<HashMap<Uuid, BrowserConnection>>,
    /// Per-camera last relay instant for the frame rate cap
    last_relay: RwLock<HashMap<String, Instant>>,
    relay_min_interval: Duration,
}

impl RealtimeHub {
    /// Create new RealtimeHub with the given minimum interval between
    /// relayed frames per camera
    pub fn new(relay_min_interval: Duration) -> Self {
        Self {
            browsers: RwLock::new(HashMap::new()),
            last_relay: RwLock::new(HashMap::new()),
            relay_min_interval,
        }
    }

    /// Register a browser connection
    pub async fn register(&self, conn_id: Uuid, tx: OutboundSender) {
        let mut browsers = self.browsers.write().await;
        browsers.insert(
            conn_id,
            BrowserConnection {
                tx,
                subscribed_session: None,
            },
        );
        tracing::info!(connection_id = %conn_id, "Browser connected");
    }

    /// Unregister a browser connection
    pub async fn unregister(&self, conn_id: &Uuid) {
        let mut browsers = self.browsers.write().await;
        if browsers.remove(conn_id).is_some() {
            tracing::info!(connection_id = %conn_id, "Browser disconnected");
        }
    }

    /// Activate session-scoped filtering for a browser
    pub async fn subscribe(&self, conn_id: &Uuid, session_id: String) {
        let mut browsers = self.browsers.write().await;
        if let Some(conn) = browsers.get_mut(conn_id) {
            tracing::info!(connection_id = %conn_id, session_id = %session_id, "Browser subscribed to session");
            conn.subscribed_session = Some(session_id);
        }
    }

    /// Number of connected browsers
    pub async fn browser_count(&self) -> usize {
        self.browsers.read().await.len()
    }

    /// Broadcast an event to browsers, honoring session subscriptions.
    ///
    /// `session_tag = None` means the event is not session-scoped and
    /// goes to every browser (e.g. camera_disconnected).
    pub async fn broadcast_event(&self, session_tag: Option<&str>, event: HubEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub event");
                return;
            }
        };

        let browsers = self.browsers.read().await;
        let mut delivered = 0usize;
        for (conn_id, conn) in browsers.iter() {
            let wanted = match (&conn.subscribed_session, session_tag) {
                (Some(sub), Some(tag)) => sub == tag,
                // Unsubscribed browsers are global observers
                _ => true,
            };
            if !wanted {
                continue;
            }
            if let Err(e) = conn.tx.send(Outbound::Text(json.clone())) {
                tracing::warn!(connection_id = %conn_id, error = %e, "Failed to send hub event");
            } else {
                delivered += 1;
            }
        }

        tracing::debug!(
            event = event.name(),
            session_tag = ?session_tag,
            delivered = delivered,
            "Hub event broadcast"
        );
    }

    /// Send an event to a single browser (command replies)
    pub async fn send_to(&self, conn_id: &Uuid, event: HubEvent) {
        let json = match serde_json::to_string(&event) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize hub event");
                return;
            }
        };
        let browsers = self.browsers.read().await;
        if let Some(conn) = browsers.get(conn_id) {
            if let Err(e) = conn.tx.send(Outbound::Text(json)) {
                tracing::warn!(connection_id = %conn_id, error = %e, "Failed to send hub event");
            }
        }
    }

    /// Relay a raw camera frame (metadata text + binary JPEG) to every
    /// browser, rate-capped per camera. Returns false when the frame was
    /// dropped by the cap.
    ///
    /// Relay is never session-gated: live viewing stays available
    /// outside measurement sessions.
    pub async fn relay_frame(&self, camera_id: &str, data: Vec<u8>) -> bool {
        let now = Instant::now();
        {
            let mut last = self.last_relay.write().await;
            if let Some(prev) = last.get(camera_id) {
                if now.duration_since(*prev) < self.relay_min_interval {
                    return false;
                }
            }
            last.insert(camera_id.to_string(), now);
        }

        let metadata = FrameMetadata {
            kind: "frame_metadata".to_string(),
            camera_id: camera_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            size: data.len(),
        };
        let json = match serde_json::to_string(&metadata) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize frame metadata");
                return false;
            }
        };

        let browsers = self.browsers.read().await;
        for (conn_id, conn) in browsers.iter() {
            // Metadata and frame ride the same ordered channel, so the
            // pair arrives in order per recipient
            if conn.tx.send(Outbound::Text(json.clone())).is_err()
                || conn.tx.send(Outbound::Binary(data.clone())).is_err()
            {
                tracing::warn!(connection_id = %conn_id, "Failed to relay frame to browser");
            }
        }
        true
    }
}
