//! SessionStore - Persistence Collaborator Surface
//!
//! ## Responsibilities
//!
//! - Create/end measurement sessions and assign their ids
//! - Append detection records per session
//! - List/get sessions and paginated detections
//!
//! The hub consumes persistence strictly through this surface
//! (create/end/append/list/get); the backing here is in-memory, so an
//! external store can be swapped in behind the same operations.

use crate::detection_processor::DetectionRecord;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// A time-boxed measurement session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub target_count: u32,
    pub status: SessionStatus,
}

/// SessionStore instance
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    detections: RwLock<HashMap<String, Vec<DetectionRecord>>>,
}

impl SessionStore {
    /// Create new SessionStore
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            detections: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session; the store assigns the id
    pub async fn create_session(&self, duration_minutes: u32, target_count: u32) -> Session {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            duration_minutes,
            target_count,
            status: SessionStatus::Active,
        };

        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session.clone());
        tracing::info!(session_id = %session.id, duration_minutes, target_count, "Session created");
        session
    }

    /// Finalize a session
    pub async fn end_session(&self, session_id: &str) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?;

        session.status = SessionStatus::Completed;
        session.ended_at = Some(Utc::now());
        tracing::info!(session_id = %session_id, "Session finalized");
        Ok(session.clone())
    }

    /// Get one session
    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// List all sessions, newest first
    pub async fn list_sessions(&self) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<Session> = sessions.values().cloned().collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }

    /// Append an immutable detection record to its session
    pub async fn append_detection(&self, record: DetectionRecord) {
        let mut detections = self.detections.write().await;
        detections
            .entry(record.session_id.clone())
            .or_default()
            .push(record);
    }

    /// Paginated detections for a session, in append order
    pub async fn get_detections(
        &self,
        session_id: &str,
        limit: usize,
        skip: usize,
    ) -> Vec<DetectionRecord> {
        let detections = self.detections.read().await;
        detections
            .get(session_id)
            .map(|records| records.iter().skip(skip).take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Total detections recorded for a session
    pub async fn detection_count(&self, session_id: &str) -> usize {
        self.detections
            .read()
            .await
            .get(session_id)
            .map(|r| r.len())
            .unwrap_or(0)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str, camera_id: &str) -> DetectionRecord {
        DetectionRecord {
            timestamp: Utc::now(),
            camera_id: camera_id.to_string(),
            detections: vec![],
            vehicle_count: 1,
            person_count: 0,
            inference_time: 0.05,
            image_size: vec![480, 640],
            session_id: session_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_end_session() {
        let store = SessionStore::new();
        let session = store.create_session(5, 100).await;
        assert_eq!(session.status, SessionStatus::Active);

        let ended = store.end_session(&session.id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert!(ended.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_end_unknown_session_fails() {
        let store = SessionStore::new();
        assert!(store.end_session("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_detection_pagination() {
        let store = SessionStore::new();
        let session = store.create_session(1, 5).await;
        for _ in 0..10 {
            store.append_detection(record(&session.id, "cam1")).await;
        }

        assert_eq!(store.detection_count(&session.id).await, 10);
        assert_eq!(store.get_detections(&session.id, 4, 0).await.len(), 4);
        assert_eq!(store.get_detections(&session.id, 100, 8).await.len(), 2);
        assert!(store.get_detections("other", 10, 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_list_sessions_newest_first() {
        let store = SessionStore::new();
        let a = store.create_session(1, 1).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = store.create_session(2, 2).await;

        let listed = store.list_sessions().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }
}
