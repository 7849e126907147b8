//! AI worker wire types and the derived detection record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single detection from the AI worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: i32,
    pub class_name: String,
    pub confidence: f32,
    /// [x1, y1, x2, y2] normalized coordinates
    pub bbox: [f32; 4],
}

/// Traffic analysis block supplied by the AI worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficAnalysis {
    /// Density tier: "low", "moderate" or "high"
    pub density: String,
    pub vehicle_count: u32,
    #[serde(default)]
    pub counts_by_type: std::collections::HashMap<String, u32>,
    #[serde(default)]
    pub camera_id: Option<String>,
}

/// Result payload inside a detection_response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionResults {
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub inference_time: f64,
    #[serde(default)]
    pub image_size: Vec<u32>,
    #[serde(default)]
    pub traffic_analysis: Option<TrafficAnalysis>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Messages arriving on the AI worker socket
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AiInbound {
    AiConnected {
        #[serde(default)]
        message: Option<String>,
    },
    DetectionResponse {
        #[serde(default)]
        camera_id: Option<String>,
        /// A malformed worker may omit the payload entirely; the
        /// in-flight slot must still be settled, so parsing cannot fail
        /// on an absent results block
        #[serde(default)]
        results: DetectionResults,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    Pong {
        #[serde(default)]
        timestamp: Option<f64>,
    },
}

/// Immutable record of one processed frame, never mutated after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub timestamp: DateTime<Utc>,
    pub camera_id: String,
    pub detections: Vec<Detection>,
    pub vehicle_count: u32,
    pub person_count: u32,
    pub inference_time: f64,
    pub image_size: Vec<u32>,
    pub session_id: String,
}
