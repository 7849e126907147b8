//! Shared models and types for the traffic hub
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    /// AI worker has a live socket connection to the hub
    pub ai_socket_connected: bool,
    /// AI worker answered its last HTTP health probe
    pub ai_worker_healthy: bool,
}

/// Diagnostic snapshot returned by GET /api/status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub cameras_connected: usize,
    pub browsers_connected: usize,
    pub ai_connected: bool,
    pub active_session_id: Option<String>,
    pub detection_enabled: bool,
    pub in_flight_requests: u32,
    pub consecutive_ai_errors: u32,
    pub requests_this_minute: u32,
    /// Per-camera ingest FPS estimate (0.0 until a window completes)
    pub camera_fps: HashMap<String, f32>,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// System health metrics sampled from the host
#[derive(Debug, Clone, Default)]
pub struct SystemHealth {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

impl SystemHealth {
    pub fn update(&mut self, cpu: f32, memory: f32) {
        self.cpu_percent = cpu;
        self.memory_percent = memory;
    }
}
