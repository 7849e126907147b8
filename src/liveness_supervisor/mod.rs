//! LivenessSupervisor - Keepalive Sweep
//!
//! ## Responsibilities
//!
//! - One keepalive set over every connection of every role
//! - Periodic sweep: dead connections are closed, live ones pinged
//!
//! A connection that misses exactly one full sweep window is
//! terminated. Termination is a Close pushed onto the connection's
//! outbound channel; the socket task then exits through the same
//! role-specific cleanup path as a normal close.

use crate::connection_registry::{ConnectionRole, Outbound, OutboundSender};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

struct KeepaliveEntry {
    role: ConnectionRole,
    tx: OutboundSender,
    alive: bool,
}

/// LivenessSupervisor instance
pub struct LivenessSupervisor {
    entries: RwLock<HashMap<Uuid, KeepaliveEntry>>,
}

impl LivenessSupervisor {
    /// Create new LivenessSupervisor
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection, initially alive
    pub async fn register(&self, conn_id: Uuid, role: ConnectionRole, tx: OutboundSender) {
        let mut entries = self.entries.write().await;
        entries.insert(
            conn_id,
            KeepaliveEntry {
                role,
                tx,
                alive: true,
            },
        );
    }

    /// Remove a connection (normal close path)
    pub async fn deregister(&self, conn_id: &Uuid) {
        self.entries.write().await.remove(conn_id);
    }

    /// Record a pong (WS Pong frame, or the AI worker's JSON pong)
    pub async fn mark_alive(&self, conn_id: &Uuid) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(conn_id) {
            entry.alive = true;
        }
    }

    /// One sweep over the keepalive set.
    ///
    /// Connections whose alive flag is still false are terminated;
    /// the rest have the flag cleared and receive a ping. Returns the
    /// number of terminated connections.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let mut dead: Vec<Uuid> = Vec::new();

        for (conn_id, entry) in entries.iter_mut() {
            if !entry.alive {
                tracing::warn!(
                    connection_id = %conn_id,
                    role = entry.role.as_str(),
                    "Connection missed keepalive window, terminating"
                );
                let _ = entry.tx.send(Outbound::Close);
                dead.push(*conn_id);
                continue;
            }

            entry.alive = false;
            if entry.tx.send(Outbound::Ping).is_err() {
                // Channel gone means the socket task already exited
                dead.push(*conn_id);
            }
        }

        for conn_id in &dead {
            entries.remove(conn_id);
        }

        if !dead.is_empty() {
            tracing::info!(terminated = dead.len(), "Keepalive sweep terminated connections");
        }
        dead.len()
    }

    /// Number of supervised connections
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for LivenessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_responsive_connection_survives_sweeps() {
        let supervisor = LivenessSupervisor::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        supervisor.register(conn, ConnectionRole::Browser, tx).await;

        assert_eq!(supervisor.sweep().await, 0);
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Ping));

        // Peer pongs before the next sweep
        supervisor.mark_alive(&conn).await;
        assert_eq!(supervisor.sweep().await, 0);
        assert_eq!(supervisor.count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_one_window_terminates() {
        let supervisor = LivenessSupervisor::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        supervisor.register(conn, ConnectionRole::Camera, tx).await;

        // First sweep: ping sent, flag cleared
        supervisor.sweep().await;
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Ping));

        // No pong: second sweep terminates
        assert_eq!(supervisor.sweep().await, 1);
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Close));
        assert_eq!(supervisor.count().await, 0);
    }

    #[tokio::test]
    async fn test_gone_socket_task_is_pruned() {
        let supervisor = LivenessSupervisor::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        supervisor.register(Uuid::new_v4(), ConnectionRole::Ai, tx).await;

        assert_eq!(supervisor.sweep().await, 1);
        assert_eq!(supervisor.count().await, 0);
    }

    #[tokio::test]
    async fn test_deregister_removes_entry() {
        let supervisor = LivenessSupervisor::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        supervisor.register(conn, ConnectionRole::Browser, tx).await;
        supervisor.deregister(&conn).await;
        assert_eq!(supervisor.count().await, 0);
    }
}
