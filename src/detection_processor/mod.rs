//! DetectionProcessor - AI Response Pipeline
//!
//! ## Responsibilities
//!
//! - Consume structured AI responses and errors
//! - Always settle the dispatcher's in-flight counter first
//! - Classify detections, derive counts, build immutable records
//! - Append records to the per-session ring buffer and the store
//! - Feed density classification into the redirection rule table and
//!   hand the enriched result to the browser fan-out

mod types;

pub use types::*;

use crate::detection_dispatcher::DetectionDispatcher;
use crate::realtime_hub::{
    DetectionResultsMessage, HubEvent, RealtimeHub, TrafficRedirectionMessage,
};
use crate::session_manager::SessionManager;
use crate::session_store::SessionStore;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

const VEHICLE_CLASSES: [&str; 3] = ["car", "truck", "bus"];

/// Density tier -> suggested alternative routes
fn alternative_routes(density: &str) -> Vec<String> {
    match density {
        "high" => vec![
            "Elm Avenue bypass".to_string(),
            "Riverside Drive".to_string(),
            "Hill Street connector".to_string(),
        ],
        "moderate" => vec!["Elm Avenue bypass".to_string()],
        _ => Vec::new(),
    }
}

/// Density derived from vehicle count when the AI payload omits it
fn density_for_count(vehicle_count: u32) -> &'static str {
    if vehicle_count >= 10 {
        "high"
    } else if vehicle_count >= 5 {
        "moderate"
    } else {
        "low"
    }
}

/// DetectionProcessor instance
pub struct DetectionProcessor {
    dispatcher: Arc<DetectionDispatcher>,
    sessions: Arc<SessionManager>,
    store: Arc<SessionStore>,
    hub: Arc<RealtimeHub>,
    /// Bounded per-session ring of recent records (oldest evicted)
    recent: RwLock<HashMap<String, VecDeque<DetectionRecord>>>,
    ring_capacity: usize,
}

impl DetectionProcessor {
    /// Create new DetectionProcessor
    pub fn new(
        dispatcher: Arc<DetectionDispatcher>,
        sessions: Arc<SessionManager>,
        store: Arc<SessionStore>,
        hub: Arc<RealtimeHub>,
        ring_capacity: usize,
    ) -> Self {
        Self {
            dispatcher,
            sessions,
            store,
            hub,
            recent: RwLock::new(HashMap::new()),
            ring_capacity,
        }
    }

    /// Handle a detection_response from the AI worker
    pub async fn process_response(&self, camera_id: Option<String>, results: DetectionResults) {
        // Settle the in-flight slot before anything can bail out
        if let Some(err) = results.error.as_deref() {
            self.dispatcher.complete(false).await;
            tracing::warn!(error = %err, "AI worker reported a processing error");
            return;
        }
        self.dispatcher.complete(true).await;

        let session_id = match self.sessions.active_id().await {
            Some(id) => id,
            None => {
                tracing::debug!("Detection response outside an active session, discarding");
                return;
            }
        };

        let camera_id = camera_id.unwrap_or_else(|| "unknown".to_string());

        let mut vehicle_count = 0u32;
        let mut person_count = 0u32;
        for det in &results.detections {
            let class = det.class_name.to_lowercase();
            if VEHICLE_CLASSES.contains(&class.as_str()) {
                vehicle_count += 1;
            } else if class == "person" {
                person_count += 1;
            }
        }

        let record = DetectionRecord {
            timestamp: chrono::Utc::now(),
            camera_id: camera_id.clone(),
            detections: results.detections.clone(),
            vehicle_count,
            person_count,
            inference_time: results.inference_time,
            image_size: results.image_size.clone(),
            session_id: session_id.clone(),
        };

        self.push_recent(record.clone()).await;
        self.store.append_detection(record.clone()).await;

        tracing::debug!(
            camera_id = %camera_id,
            session_id = %session_id,
            detections = results.detections.len(),
            vehicle_count,
            "Detection record stored"
        );

        self.hub
            .broadcast_event(
                Some(&session_id),
                HubEvent::DetectionResults(DetectionResultsMessage {
                    camera_id: camera_id.clone(),
                    detections: results.detections,
                    vehicle_count,
                    person_count,
                    session_id: session_id.clone(),
                    timestamp: record.timestamp.to_rfc3339(),
                    traffic_analysis: results.traffic_analysis.clone(),
                }),
            )
            .await;

        // Redirection is active iff a session is, same as dispatch
        let density = results
            .traffic_analysis
            .as_ref()
            .map(|t| t.density.clone())
            .unwrap_or_else(|| density_for_count(vehicle_count).to_string());
        let redirection = HubEvent::TrafficRedirection(TrafficRedirectionMessage {
            camera_id,
            alternative_routes: alternative_routes(&density),
            status: density,
            session_id: session_id.clone(),
        });
        self.hub.broadcast_event(Some(&session_id), redirection).await;
    }

    /// Handle an error message from the AI worker
    pub async fn process_error(&self, message: Option<String>) {
        tracing::warn!(message = ?message, "AI worker error");
        self.dispatcher.complete(false).await;
    }

    /// Recent records for a session from the in-memory ring, newest last
    pub async fn recent(&self, session_id: &str, count: usize) -> Vec<DetectionRecord> {
        let recent = self.recent.read().await;
        recent
            .get(session_id)
            .map(|ring| {
                ring.iter()
                    .rev()
                    .take(count)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn push_recent(&self, record: DetectionRecord) {
        let mut recent = self.recent.write().await;
        let ring = recent.entry(record.session_id.clone()).or_default();
        if ring.len() >= self.ring_capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_registry::Outbound;
    use crate::detection_dispatcher::DispatchPolicy;
    use tokio::sync::mpsc;
    use tokio::time::Duration;
    use uuid::Uuid;

    fn detection(class_name: &str) -> Detection {
        Detection {
            class_id: 0,
            class_name: class_name.to_string(),
            confidence: 0.9,
            bbox: [0.1, 0.1, 0.5, 0.5],
        }
    }

    fn results(classes: &[&str]) -> DetectionResults {
        DetectionResults {
            detections: classes.iter().map(|c| detection(c)).collect(),
            inference_time: 0.04,
            image_size: vec![480, 640],
            traffic_analysis: None,
            error: None,
        }
    }

    struct Fixture {
        dispatcher: Arc<DetectionDispatcher>,
        sessions: Arc<SessionManager>,
        store: Arc<SessionStore>,
        hub: Arc<RealtimeHub>,
        processor: DetectionProcessor,
    }

    fn fixture(ring_capacity: usize) -> Fixture {
        let dispatcher = Arc::new(DetectionDispatcher::new(DispatchPolicy {
            debounce: Duration::ZERO,
            max_concurrent: 100,
            ..DispatchPolicy::default()
        }));
        let store = Arc::new(SessionStore::new());
        let hub = Arc::new(RealtimeHub::new(Duration::from_millis(16)));
        let sessions = Arc::new(SessionManager::new(store.clone(), hub.clone()));
        let processor = DetectionProcessor::new(
            dispatcher.clone(),
            sessions.clone(),
            store.clone(),
            hub.clone(),
            ring_capacity,
        );
        Fixture {
            dispatcher,
            sessions,
            store,
            hub,
            processor,
        }
    }

    #[tokio::test]
    async fn test_response_outside_session_is_discarded_but_settled() {
        let f = fixture(10);
        f.dispatcher.try_admit("cam1").await.unwrap();

        f.processor
            .process_response(Some("cam1".to_string()), results(&["car"]))
            .await;

        // In-flight settled even though the record was discarded
        assert_eq!(f.dispatcher.snapshot().await.in_flight, 0);
        assert!(f.processor.recent("any", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_counts_and_persistence() {
        let f = fixture(10);
        let session = f.sessions.start(5, 100).await.unwrap();

        f.processor
            .process_response(
                Some("cam1".to_string()),
                results(&["car", "truck", "bus", "person", "bicycle"]),
            )
            .await;

        let stored = f.store.get_detections(&session.id, 10, 0).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].vehicle_count, 3);
        assert_eq!(stored[0].person_count, 1);
        assert_eq!(stored[0].camera_id, "cam1");
        assert_eq!(stored[0].session_id, session.id);
    }

    #[tokio::test]
    async fn test_ring_buffer_evicts_oldest() {
        let f = fixture(3);
        let session = f.sessions.start(5, 100).await.unwrap();

        for i in 0..5 {
            f.processor
                .process_response(Some(format!("cam{i}")), results(&["car"]))
                .await;
        }

        let recent = f.processor.recent(&session.id, 10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].camera_id, "cam2");
        assert_eq!(recent[2].camera_id, "cam4");

        // Store keeps everything; the ring is the bounded view
        assert_eq!(f.store.detection_count(&session.id).await, 5);
    }

    #[tokio::test]
    async fn test_error_payload_counts_toward_breaker() {
        let f = fixture(10);
        f.sessions.start(5, 100).await.unwrap();
        f.dispatcher.try_admit("cam1").await.unwrap();

        let mut payload = results(&[]);
        payload.error = Some("decode failure".to_string());
        f.processor.process_response(Some("cam1".to_string()), payload).await;

        let snap = f.dispatcher.snapshot().await;
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.consecutive_errors, 1);
    }

    #[tokio::test]
    async fn test_error_message_settles_and_counts() {
        let f = fixture(10);
        f.dispatcher.try_admit("cam1").await.unwrap();

        f.processor.process_error(Some("boom".to_string())).await;

        let snap = f.dispatcher.snapshot().await;
        assert_eq!(snap.in_flight, 0);
        assert_eq!(snap.consecutive_errors, 1);
    }

    #[tokio::test]
    async fn test_broadcasts_results_then_redirection() {
        let f = fixture(10);
        let session = f.sessions.start(5, 100).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        f.hub.register(conn, tx).await;
        f.hub.subscribe(&conn, session.id.clone()).await;

        f.processor
            .process_response(Some("cam1".to_string()), results(&["car"]))
            .await;

        match rx.try_recv().unwrap() {
            Outbound::Text(json) => {
                assert!(json.contains("\"type\":\"detection_results\""));
                assert!(json.contains(&format!("\"sessionId\":\"{}\"", session.id)));
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            Outbound::Text(json) => {
                assert!(json.contains("\"type\":\"traffic_redirection\""));
                assert!(json.contains(&format!("\"sessionId\":\"{}\"", session.id)));
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_results_less_response_still_settles_in_flight() {
        let f = fixture(10);
        f.dispatcher.try_admit("cam1").await.unwrap();

        // A worker bug can drop the results block entirely
        let inbound: AiInbound = serde_json::from_str("{\"type\":\"detection_response\"}").unwrap();
        match inbound {
            AiInbound::DetectionResponse { camera_id, results } => {
                f.processor.process_response(camera_id, results).await;
            }
            other => panic!("unexpected message: {other:?}"),
        }

        assert_eq!(f.dispatcher.snapshot().await.in_flight, 0);
    }

    #[test]
    fn test_density_rules() {
        assert_eq!(density_for_count(0), "low");
        assert_eq!(density_for_count(5), "moderate");
        assert_eq!(density_for_count(10), "high");
        assert!(alternative_routes("low").is_empty());
        assert_eq!(alternative_routes("moderate").len(), 1);
        assert_eq!(alternative_routes("high").len(), 3);
    }
}
