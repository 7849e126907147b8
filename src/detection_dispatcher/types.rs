//! Dispatch policy and admission types

use serde::Serialize;
use tokio::time::Duration;

/// Tunable admission-control policy
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Maximum in-flight AI requests (the worker processes synchronously)
    pub max_concurrent: u32,
    /// Sliding-window budget per 60s
    pub rate_limit_per_minute: u32,
    /// Minimum inter-dispatch interval per camera
    pub debounce: Duration,
    /// Consecutive upstream errors before the breaker opens
    pub max_consecutive_errors: u32,
    /// How long the breaker stays open
    pub breaker_cooldown: Duration,
    /// In-flight watchdog: reset the counter if no completion for this long
    pub stall_timeout: Duration,
    /// Confidence threshold forwarded to the AI worker
    pub confidence: f32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            rate_limit_per_minute: 300,
            debounce: Duration::from_millis(200),
            max_consecutive_errors: 10,
            breaker_cooldown: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(30),
            confidence: 0.25,
        }
    }
}

/// Why a frame was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Circuit breaker is open
    Disabled,
    /// Per-camera debounce interval has not elapsed
    Debounced,
    /// Per-minute budget exhausted
    RateLimited,
    /// In-flight requests at the concurrency cap
    OverCapacity,
}

/// Outcome of a dispatch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// Metadata + frame handed to the AI channel
    Sent,
    /// Dropped by admission control (never queued)
    Rejected(RejectReason),
    /// Admitted but the send failed; counters were corrected
    Failed,
}

/// Metadata message preceding the binary frame on the AI channel.
///
/// The worker correlates "metadata then next binary frame" as one
/// request; both ride a single ordered channel, and the request id
/// makes the pairing explicit.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRequestMetadata {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub request_id: String,
    pub camera_id: String,
    pub confidence: f32,
    pub timestamp: String,
    pub session_id: String,
}

/// Dispatcher counters for the status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherSnapshot {
    pub enabled: bool,
    pub in_flight: u32,
    pub consecutive_errors: u32,
    pub requests_this_minute: u32,
}
