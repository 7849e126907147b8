//! ConnectionRegistry - Role Multiplexer
//!
//! ## Responsibilities
//!
//! - Track camera connections by externally supplied id
//! - Hold the singleton AI worker connection
//! - Map low-level connection ids back to camera ids for cleanup
//!
//! Browser connections live in [`crate::realtime_hub`]; this registry
//! covers the producer side (cameras) and the AI worker singleton.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outbound frame on a socket's ordered send channel.
///
/// Every connection gets exactly one unbounded channel; a Text metadata
/// message followed by a Binary payload is therefore delivered in order
/// without any timing dependency.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Close,
}

/// Sender half of a connection's outbound channel
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Connection role, resolved once at upgrade time from the `type`
/// query parameter. Unknown or missing values default to Browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Camera,
    Browser,
    Ai,
}

impl ConnectionRole {
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("camera") => Self::Camera,
            Some("ai") => Self::Ai,
            _ => Self::Browser,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Browser => "browser",
            Self::Ai => "ai",
        }
    }
}

/// Camera metadata supplied by the camera's identifying message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Serializable camera snapshot for browser queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSummary {
    pub id: String,
    pub connected: bool,
    #[serde(flatten)]
    pub info: CameraInfo,
}

/// Registered camera connection
struct CameraEntry {
    conn_id: Uuid,
    tx: OutboundSender,
    info: CameraInfo,
    connected: bool,
}

/// The singleton AI worker connection
struct AiEntry {
    conn_id: Uuid,
    tx: OutboundSender,
}

/// ConnectionRegistry instance
pub struct ConnectionRegistry {
    cameras: RwLock<HashMap<String, CameraEntry>>,
    by_conn: RwLock<HashMap<Uuid, String>>,
    ai: RwLock<Option<AiEntry>>,
}

impl ConnectionRegistry {
    /// Create new ConnectionRegistry
    pub fn new() -> Self {
        Self {
            cameras: RwLock::new(HashMap::new()),
            by_conn: RwLock::new(HashMap::new()),
            ai: RwLock::new(None),
        }
    }

    /// Register a camera under its externally supplied id.
    ///
    /// A reconnect under the same id takes over the entry; the stale
    /// connection-id mapping is dropped so the old socket's close path
    /// cannot deregister the new connection.
    pub async fn register_camera(
        &self,
        camera_id: &str,
        conn_id: Uuid,
        tx: OutboundSender,
        info: CameraInfo,
    ) {
        let mut cameras = self.cameras.write().await;
        let mut by_conn = self.by_conn.write().await;

        if let Some(prev) = cameras.get(camera_id) {
            if prev.conn_id != conn_id {
                by_conn.remove(&prev.conn_id);
                tracing::info!(camera_id = %camera_id, "Camera reconnected, replacing previous connection");
            }
        }

        by_conn.insert(conn_id, camera_id.to_string());
        cameras.insert(
            camera_id.to_string(),
            CameraEntry {
                conn_id,
                tx,
                info,
                connected: true,
            },
        );

        tracing::info!(camera_id = %camera_id, connection_id = %conn_id, "Camera registered");
    }

    /// Update metadata for an already registered camera
    pub async fn update_info(&self, camera_id: &str, info: CameraInfo) {
        let mut cameras = self.cameras.write().await;
        if let Some(entry) = cameras.get_mut(camera_id) {
            entry.info = info;
            tracing::debug!(camera_id = %camera_id, "Camera metadata updated");
        }
    }

    /// Camera id bound to a connection, if identified
    pub async fn camera_id_for(&self, conn_id: &Uuid) -> Option<String> {
        self.by_conn.read().await.get(conn_id).cloned()
    }

    /// Remove the camera bound to a closing connection.
    ///
    /// Returns the camera id so the caller can notify browsers.
    pub async fn remove_by_conn(&self, conn_id: &Uuid) -> Option<String> {
        let mut by_conn = self.by_conn.write().await;
        let camera_id = by_conn.remove(conn_id)?;

        let mut cameras = self.cameras.write().await;
        if let Some(entry) = cameras.get(&camera_id) {
            // Guard against a stale close racing a reconnect
            if entry.conn_id == *conn_id {
                cameras.remove(&camera_id);
                tracing::info!(camera_id = %camera_id, "Camera deregistered");
                return Some(camera_id);
            }
        }
        None
    }

    /// Get a camera snapshot
    pub async fn get(&self, camera_id: &str) -> Option<CameraSummary> {
        let cameras = self.cameras.read().await;
        cameras.get(camera_id).map(|e| CameraSummary {
            id: camera_id.to_string(),
            connected: e.connected,
            info: e.info.clone(),
        })
    }

    /// List all camera snapshots
    pub async fn list(&self) -> Vec<CameraSummary> {
        let cameras = self.cameras.read().await;
        let mut out: Vec<CameraSummary> = cameras
            .iter()
            .map(|(id, e)| CameraSummary {
                id: id.clone(),
                connected: e.connected,
                info: e.info.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Number of connected cameras
    pub async fn camera_count(&self) -> usize {
        self.cameras.read().await.len()
    }

    /// Install the AI worker connection, unconditionally replacing any
    /// previous one. Returns true if a previous connection was replaced.
    pub async fn set_ai(&self, conn_id: Uuid, tx: OutboundSender) -> bool {
        let mut ai = self.ai.write().await;
        let replaced = ai.is_some();
        if replaced {
            tracing::info!(connection_id = %conn_id, "AI worker connection replaced");
        } else {
            tracing::info!(connection_id = %conn_id, "AI worker connected");
        }
        *ai = Some(AiEntry { conn_id, tx });
        replaced
    }

    /// Clear the AI slot, but only if the closing connection still owns
    /// it. A replaced connection's close must not evict its successor.
    pub async fn clear_ai(&self, conn_id: &Uuid) -> bool {
        let mut ai = self.ai.write().await;
        match ai.as_ref() {
            Some(entry) if entry.conn_id == *conn_id => {
                *ai = None;
                tracing::warn!(connection_id = %conn_id, "AI worker disconnected");
                true
            }
            _ => false,
        }
    }

    /// Current AI worker sender, if connected
    pub async fn ai_sender(&self) -> Option<OutboundSender> {
        self.ai.read().await.as_ref().map(|e| e.tx.clone())
    }

    /// Whether an AI worker socket is live
    pub async fn ai_connected(&self) -> bool {
        self.ai.read().await.is_some()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> OutboundSender {
        mpsc::unbounded_channel().0
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        registry
            .register_camera("cam1", conn, sender(), CameraInfo::default())
            .await;

        assert_eq!(registry.camera_id_for(&conn).await.as_deref(), Some("cam1"));
        assert_eq!(registry.camera_count().await, 1);
        assert!(registry.get("cam1").await.unwrap().connected);
    }

    #[tokio::test]
    async fn test_remove_by_conn_returns_camera_id() {
        let registry = ConnectionRegistry::new();
        let conn = Uuid::new_v4();
        registry
            .register_camera("cam1", conn, sender(), CameraInfo::default())
            .await;

        let removed = registry.remove_by_conn(&conn).await;
        assert_eq!(removed.as_deref(), Some("cam1"));
        assert!(registry.get("cam1").await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_takes_over_entry() {
        let registry = ConnectionRegistry::new();
        let old_conn = Uuid::new_v4();
        let new_conn = Uuid::new_v4();
        registry
            .register_camera("cam1", old_conn, sender(), CameraInfo::default())
            .await;
        registry
            .register_camera("cam1", new_conn, sender(), CameraInfo::default())
            .await;

        // The stale connection's close path must not evict the new one
        assert!(registry.remove_by_conn(&old_conn).await.is_none());
        assert!(registry.get("cam1").await.is_some());

        assert_eq!(registry.remove_by_conn(&new_conn).await.as_deref(), Some("cam1"));
    }

    #[tokio::test]
    async fn test_ai_singleton_replacement() {
        let registry = ConnectionRegistry::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(!registry.set_ai(first, sender()).await);
        assert!(registry.set_ai(second, sender()).await);

        // Old connection closing must not clear the new singleton
        assert!(!registry.clear_ai(&first).await);
        assert!(registry.ai_connected().await);

        assert!(registry.clear_ai(&second).await);
        assert!(!registry.ai_connected().await);
    }

    #[tokio::test]
    async fn test_role_from_param_defaults_to_browser() {
        assert_eq!(ConnectionRole::from_param(Some("camera")), ConnectionRole::Camera);
        assert_eq!(ConnectionRole::from_param(Some("ai")), ConnectionRole::Ai);
        assert_eq!(ConnectionRole::from_param(Some("unknown")), ConnectionRole::Browser);
        assert_eq!(ConnectionRole::from_param(None), ConnectionRole::Browser);
    }
}
