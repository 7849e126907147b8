//! SessionManager - Single Active-Session Lifecycle
//!
//! ## Responsibilities
//!
//! - Own the single active-session slot (at most one system-wide)
//! - Start/end sessions through the session store
//! - Arm an identity-guarded auto-expire timer per session
//!
//! Detection dispatch and traffic redirection are active iff a session
//! is active; raw video relay is never session-gated (cost control:
//! outside a session frames are relayed live but not sent for
//! inference).

use crate::error::{Error, Result};
use crate::realtime_hub::{HubEvent, RealtimeHub, SessionStatusMessage};
use crate::session_store::{Session, SessionStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// SessionManager instance
pub struct SessionManager {
    store: Arc<SessionStore>,
    hub: Arc<RealtimeHub>,
    active: RwLock<Option<Session>>,
}

impl SessionManager {
    /// Create new SessionManager
    pub fn new(store: Arc<SessionStore>, hub: Arc<RealtimeHub>) -> Self {
        Self {
            store,
            hub,
            active: RwLock::new(None),
        }
    }

    /// Start a measurement session.
    ///
    /// Fails with Conflict if a session is already active. On success
    /// the auto-expire timer is armed for `duration_minutes * 60s`; its
    /// callback only acts if the still-active session id equals the id
    /// it was armed for, so a stale timer can never end a later session.
    pub async fn start(
        self: &Arc<Self>,
        duration_minutes: u32,
        target_count: u32,
    ) -> Result<Session> {
        if duration_minutes == 0 {
            return Err(Error::Validation("duration must be at least 1 minute".to_string()));
        }

        let session = {
            let mut active = self.active.write().await;
            if let Some(current) = active.as_ref() {
                return Err(Error::Conflict(format!(
                    "session {} is already active",
                    current.id
                )));
            }
            let session = self.store.create_session(duration_minutes, target_count).await;
            *active = Some(session.clone());
            session
        };

        self.broadcast_status(&session, "active").await;

        let mgr = Arc::clone(self);
        let armed_for = session.id.clone();
        // Anchor the deadline now: the spawned task may be polled for
        // the first time well after start() returns
        let deadline = Instant::now() + Duration::from_secs(duration_minutes as u64 * 60);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            mgr.expire(&armed_for).await;
        });

        tracing::info!(
            session_id = %session.id,
            duration_minutes,
            target_count,
            "Session started"
        );
        Ok(session)
    }

    /// End the active session.
    ///
    /// Fails with Validation (400) if `session_id` does not match the
    /// active session; a mismatched or repeated end never mutates state.
    pub async fn end(&self, session_id: &str) -> Result<Session> {
        let ended = {
            let mut active = self.active.write().await;
            match active.as_ref() {
                Some(current) if current.id == session_id => {
                    let ended = self.store.end_session(session_id).await?;
                    *active = None;
                    ended
                }
                Some(current) => {
                    return Err(Error::Validation(format!(
                        "session id {} does not match active session {}",
                        session_id, current.id
                    )));
                }
                None => {
                    return Err(Error::Validation(
                        "no session is currently active".to_string(),
                    ));
                }
            }
        };

        self.broadcast_status(&ended, "completed").await;
        tracing::info!(session_id = %session_id, "Session ended");
        Ok(ended)
    }

    /// Auto-expire callback; a no-op unless `session_id` is still the
    /// active session.
    pub async fn expire(&self, session_id: &str) {
        let ended = {
            let mut active = self.active.write().await;
            match active.as_ref() {
                Some(current) if current.id == session_id => {
                    match self.store.end_session(session_id).await {
                        Ok(ended) => {
                            *active = None;
                            Some(ended)
                        }
                        Err(e) => {
                            tracing::error!(session_id = %session_id, error = %e, "Failed to finalize expired session");
                            *active = None;
                            None
                        }
                    }
                }
                _ => {
                    tracing::debug!(session_id = %session_id, "Stale expire timer ignored");
                    None
                }
            }
        };

        if let Some(session) = ended {
            tracing::info!(session_id = %session_id, "Session auto-expired");
            self.broadcast_status(&session, "completed").await;
        }
    }

    /// Id of the active session, if any
    pub async fn active_id(&self) -> Option<String> {
        self.active.read().await.as_ref().map(|s| s.id.clone())
    }

    /// Whether a session is active
    pub async fn is_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Snapshot of the active session
    pub async fn active_session(&self) -> Option<Session> {
        self.active.read().await.clone()
    }

    /// Session status announcements go to every browser; a browser
    /// subscribed to a previous session still learns about the new one.
    async fn broadcast_status(&self, session: &Session, status: &str) {
        self.hub
            .broadcast_event(
                None,
                HubEvent::SessionStatus(SessionStatusMessage {
                    session_id: session.id.clone(),
                    status: status.to_string(),
                    duration_minutes: session.duration_minutes,
                    target_count: session.target_count,
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_registry::Outbound;
    use crate::session_store::SessionStatus;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn manager() -> Arc<SessionManager> {
        let store = Arc::new(SessionStore::new());
        let hub = Arc::new(RealtimeHub::new(Duration::from_millis(16)));
        Arc::new(SessionManager::new(store, hub))
    }

    #[tokio::test]
    async fn test_at_most_one_active_session() {
        let mgr = manager();
        let session = mgr.start(5, 100).await.unwrap();
        assert!(mgr.is_active().await);

        let second = mgr.start(5, 100).await;
        assert!(matches!(second, Err(Error::Conflict(_))));

        // Still the first session
        assert_eq!(mgr.active_id().await.as_deref(), Some(session.id.as_str()));
    }

    #[tokio::test]
    async fn test_end_mismatch_does_not_mutate_state() {
        let mgr = manager();
        let session = mgr.start(5, 100).await.unwrap();

        let result = mgr.end("wrong-id").await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(mgr.is_active().await);

        mgr.end(&session.id).await.unwrap();
        assert!(!mgr.is_active().await);

        // Ending an already-ended session is a rejected no-op
        assert!(matches!(mgr.end(&session.id).await, Err(Error::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_expire_after_duration() {
        let mgr = manager();
        let session = mgr.start(1, 5).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(mgr.is_active().await);

        tokio::time::advance(Duration::from_secs(2)).await;
        // Let the armed task run
        tokio::task::yield_now().await;
        assert!(!mgr.is_active().await);

        let stored = mgr.store.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_cannot_end_later_session() {
        let mgr = manager();
        let first = mgr.start(1, 5).await.unwrap();
        mgr.end(&first.id).await.unwrap();

        let second = mgr.start(10, 5).await.unwrap();

        // First session's timer fires; identity guard must ignore it
        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(mgr.active_id().await.as_deref(), Some(second.id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_broadcast_on_expiry() {
        let store = Arc::new(SessionStore::new());
        let hub = Arc::new(RealtimeHub::new(Duration::from_millis(16)));
        let mgr = Arc::new(SessionManager::new(store, hub.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(Uuid::new_v4(), tx).await;

        mgr.start(1, 5).await.unwrap();
        // active announcement
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Text(_)));

        tokio::time::advance(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        match rx.try_recv().unwrap() {
            Outbound::Text(json) => assert!(json.contains("\"status\":\"completed\"")),
            other => panic!("unexpected outbound: {other:?}"),
        }
    }
}
