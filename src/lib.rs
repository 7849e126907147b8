//! Traffic Hub Library
//!
//! Real-time traffic relay hub: camera producers, a single AI
//! inference worker, and browser consumers over persistent WebSocket
//! connections, plus an HTTP control surface for measurement sessions.
//!
//! ## Architecture (10 Components)
//!
//! 1. ConnectionRegistry - Camera map + AI worker singleton
//! 2. FrameIngest - Latest-wins frame buffer with FPS estimation
//! 3. SessionManager - Single active measurement session lifecycle
//! 4. DetectionDispatcher - Admission-controlled AI gateway
//! 5. DetectionProcessor - AI response pipeline and fan-out
//! 6. RealtimeHub - Browser WebSocket distribution
//! 7. LivenessSupervisor - Keepalive sweep across all roles
//! 8. SessionStore - Session and detection persistence surface
//! 9. AiMonitor - AI worker health probe
//! 10. WebAPI - REST endpoints + WebSocket upgrade

pub mod ai_monitor;
pub mod connection_registry;
pub mod detection_dispatcher;
pub mod detection_processor;
pub mod error;
pub mod frame_ingest;
pub mod liveness_supervisor;
pub mod models;
pub mod realtime_hub;
pub mod session_manager;
pub mod session_store;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
