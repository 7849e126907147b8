//! Application state
//!
//! Holds all shared components and state

use crate::ai_monitor::AiMonitor;
use crate::connection_registry::ConnectionRegistry;
use crate::detection_dispatcher::{DetectionDispatcher, DispatchPolicy};
use crate::detection_processor::DetectionProcessor;
use crate::frame_ingest::FrameIngest;
use crate::liveness_supervisor::LivenessSupervisor;
use crate::models::SystemHealth;
use crate::realtime_hub::RealtimeHub;
use crate::session_manager::SessionManager;
use crate::session_store::SessionStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// AI worker health endpoint
    pub ai_health_url: String,
    /// Maximum in-flight AI requests
    pub max_concurrent: u32,
    /// Dispatch budget per minute
    pub rate_limit_per_minute: u32,
    /// Per-camera debounce in milliseconds
    pub debounce_ms: u64,
    /// Consecutive errors before the breaker opens
    pub max_consecutive_errors: u32,
    /// Breaker cooldown in seconds
    pub breaker_cooldown_secs: u64,
    /// In-flight watchdog stall timeout in seconds
    pub stall_timeout_secs: u64,
    /// Confidence threshold forwarded to the AI worker
    pub confidence: f32,
    /// Minimum interval between relayed frames per camera (ms)
    pub relay_min_interval_ms: u64,
    /// Per-session detection ring capacity
    pub ring_capacity: usize,
    /// Keepalive sweep interval in seconds
    pub keepalive_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 3000),
            ai_health_url: std::env::var("AI_HEALTH_URL")
                .unwrap_or_else(|_| "http://localhost:8000/health".to_string()),
            max_concurrent: env_parse("MAX_CONCURRENT_DETECTIONS", 2),
            rate_limit_per_minute: env_parse("DETECTION_RATE_LIMIT", 300),
            debounce_ms: env_parse("DETECTION_DEBOUNCE_MS", 200),
            max_consecutive_errors: env_parse("AI_MAX_CONSECUTIVE_ERRORS", 10),
            breaker_cooldown_secs: env_parse("AI_BREAKER_COOLDOWN_SECS", 30),
            stall_timeout_secs: env_parse("AI_STALL_TIMEOUT_SECS", 30),
            confidence: env_parse("DETECTION_CONFIDENCE", 0.25),
            relay_min_interval_ms: env_parse("RELAY_MIN_INTERVAL_MS", 16),
            ring_capacity: env_parse("DETECTION_RING_CAPACITY", 1000),
            keepalive_interval_secs: env_parse("KEEPALIVE_INTERVAL_SECS", 30),
        }
    }
}

impl AppConfig {
    /// Dispatch policy derived from the config knobs
    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_concurrent: self.max_concurrent,
            rate_limit_per_minute: self.rate_limit_per_minute,
            debounce: Duration::from_millis(self.debounce_ms),
            max_consecutive_errors: self.max_consecutive_errors,
            breaker_cooldown: Duration::from_secs(self.breaker_cooldown_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            confidence: self.confidence,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Camera map + AI singleton
    pub registry: Arc<ConnectionRegistry>,
    /// Latest-wins frame buffer
    pub ingest: Arc<FrameIngest>,
    /// Single active-session lifecycle
    pub sessions: Arc<SessionManager>,
    /// Admission-controlled AI gateway
    pub dispatcher: Arc<DetectionDispatcher>,
    /// AI response pipeline
    pub processor: Arc<DetectionProcessor>,
    /// Browser fan-out
    pub hub: Arc<RealtimeHub>,
    /// Keepalive sweep
    pub supervisor: Arc<LivenessSupervisor>,
    /// Persistence collaborator surface
    pub store: Arc<SessionStore>,
    /// AI worker health probe
    pub ai_monitor: Arc<AiMonitor>,
    /// Host metrics for the status snapshot
    pub system_health: Arc<RwLock<SystemHealth>>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Build the component graph from a config
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let ingest = Arc::new(FrameIngest::new());
        let store = Arc::new(SessionStore::new());
        let hub = Arc::new(RealtimeHub::new(Duration::from_millis(
            config.relay_min_interval_ms,
        )));
        let sessions = Arc::new(SessionManager::new(store.clone(), hub.clone()));
        let dispatcher = Arc::new(DetectionDispatcher::new(config.dispatch_policy()));
        let processor = Arc::new(DetectionProcessor::new(
            dispatcher.clone(),
            sessions.clone(),
            store.clone(),
            hub.clone(),
            config.ring_capacity,
        ));
        let supervisor = Arc::new(LivenessSupervisor::new());
        let ai_monitor = Arc::new(AiMonitor::new(config.ai_health_url.clone()));

        Self {
            config,
            registry,
            ingest,
            sessions,
            dispatcher,
            processor,
            hub,
            supervisor,
            store,
            ai_monitor,
            system_health: Arc::new(RwLock::new(SystemHealth::default())),
            started_at: Instant::now(),
        }
    }
}
