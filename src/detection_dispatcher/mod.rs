//! DetectionDispatcher - Admission-controlled AI Gateway
//!
//! ## Responsibilities
//!
//! - Gate every eligible frame through, in order: circuit breaker,
//!   per-camera debounce, sliding 60s rate limit, concurrency cap
//! - Send admitted frames as metadata + binary on the AI channel
//! - Track consecutive upstream errors and open/close the breaker
//! - Watchdog a stalled in-flight counter (worker died mid-request)
//!
//! ## Design
//!
//! - Drop, don't queue: rejected frames are discarded, bounding
//!   end-to-end detection latency at the cost of completeness
//! - The in-flight counter must stay within [0, max_concurrent] and is
//!   corrected defensively on every failure path

mod types;

pub use types::*;

use crate::connection_registry::{Outbound, OutboundSender};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Mutable dispatcher state, guarded as one unit so gate evaluation
/// and the commit are a single atomic step
struct DispatchState {
    enabled: bool,
    breaker_opened_at: Option<Instant>,
    consecutive_errors: u32,
    in_flight: u32,
    window_start: Instant,
    window_count: u32,
    last_dispatch: HashMap<String, Instant>,
    last_completion: Instant,
}

/// DetectionDispatcher instance
pub struct DetectionDispatcher {
    policy: DispatchPolicy,
    state: Mutex<DispatchState>,
}

impl DetectionDispatcher {
    /// Create new DetectionDispatcher
    pub fn new(policy: DispatchPolicy) -> Self {
        let now = Instant::now();
        Self {
            policy,
            state: Mutex::new(DispatchState {
                enabled: true,
                breaker_opened_at: None,
                consecutive_errors: 0,
                in_flight: 0,
                window_start: now,
                window_count: 0,
                last_dispatch: HashMap::new(),
                last_completion: now,
            }),
        }
    }

    /// Evaluate all gates; on admission the counters are committed
    /// (in-flight incremented, budget consumed, debounce stamped).
    pub async fn try_admit(&self, camera_id: &str) -> Result<(), RejectReason> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        // 1. Circuit breaker; re-closes itself once the cooldown elapsed
        if !state.enabled {
            match state.breaker_opened_at {
                Some(opened) if now.duration_since(opened) >= self.policy.breaker_cooldown => {
                    state.enabled = true;
                    state.breaker_opened_at = None;
                    state.consecutive_errors = 0;
                    tracing::info!("Circuit breaker closed after cooldown, dispatch re-enabled");
                }
                _ => return Err(RejectReason::Disabled),
            }
        }

        // 2. Per-camera debounce
        if let Some(prev) = state.last_dispatch.get(camera_id) {
            if now.duration_since(*prev) < self.policy.debounce {
                return Err(RejectReason::Debounced);
            }
        }

        // 3. Sliding 60s rate limit
        if now.duration_since(state.window_start) >= RATE_WINDOW {
            state.window_start = now;
            state.window_count = 0;
        }
        if state.window_count >= self.policy.rate_limit_per_minute {
            return Err(RejectReason::RateLimited);
        }

        // 4. Concurrency cap
        if state.in_flight >= self.policy.max_concurrent {
            return Err(RejectReason::OverCapacity);
        }

        state.window_count += 1;
        state.in_flight += 1;
        state.last_dispatch.insert(camera_id.to_string(), now);
        Ok(())
    }

    /// Admit and forward one frame to the AI worker.
    ///
    /// The metadata text message and the binary frame are pushed onto
    /// the worker's single ordered channel back to back; the worker
    /// interprets "metadata then next binary" as one correlated request.
    pub async fn dispatch(
        &self,
        camera_id: &str,
        frame: &[u8],
        session_id: &str,
        ai_tx: &OutboundSender,
    ) -> DispatchResult {
        if let Err(reason) = self.try_admit(camera_id).await {
            tracing::trace!(camera_id = %camera_id, reason = ?reason, "Frame dropped by admission control");
            return DispatchResult::Rejected(reason);
        }

        let metadata = DetectionRequestMetadata {
            kind: "detection_request_metadata",
            request_id: Uuid::new_v4().to_string(),
            camera_id: camera_id.to_string(),
            confidence: self.policy.confidence,
            timestamp: chrono::Utc::now().to_rfc3339(),
            session_id: session_id.to_string(),
        };
        let json = match serde_json::to_string(&metadata) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize detection request metadata");
                self.abort_in_flight().await;
                return DispatchResult::Failed;
            }
        };

        if ai_tx.send(Outbound::Text(json)).is_err()
            || ai_tx.send(Outbound::Binary(frame.to_vec())).is_err()
        {
            tracing::warn!(camera_id = %camera_id, "AI channel send failed, correcting in-flight counter");
            self.abort_in_flight().await;
            self.record_error().await;
            return DispatchResult::Failed;
        }

        tracing::debug!(
            camera_id = %camera_id,
            request_id = %metadata.request_id,
            frame_bytes = frame.len(),
            "Frame dispatched to AI worker"
        );
        DispatchResult::Sent
    }

    /// Record a completed AI round-trip. Always decrements in-flight
    /// first; `success` additionally resets the error counter, while a
    /// failure counts toward the breaker threshold.
    pub async fn complete(&self, success: bool) {
        {
            let mut state = self.state.lock().await;
            state.in_flight = state.in_flight.saturating_sub(1);
            state.last_completion = Instant::now();
            if success {
                state.consecutive_errors = 0;
            }
        }
        if !success {
            self.record_error().await;
        }
    }

    /// Count an upstream error; opens the breaker at the threshold
    pub async fn record_error(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_errors += 1;
        if state.enabled && state.consecutive_errors >= self.policy.max_consecutive_errors {
            state.enabled = false;
            state.breaker_opened_at = Some(Instant::now());
            tracing::warn!(
                consecutive_errors = state.consecutive_errors,
                cooldown_secs = self.policy.breaker_cooldown.as_secs(),
                "Circuit breaker opened, dispatch disabled"
            );
        }
    }

    /// A replacement AI connection starts with a clean error slate
    pub async fn reset_errors(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_errors = 0;
    }

    /// Reset a stalled in-flight counter: if requests are in flight but
    /// no completion has been observed for the stall timeout, the worker
    /// died mid-request and the slots would otherwise leak forever.
    pub async fn watchdog_check(&self) {
        let mut state = self.state.lock().await;
        if state.in_flight > 0
            && Instant::now().duration_since(state.last_completion) >= self.policy.stall_timeout
        {
            tracing::warn!(
                in_flight = state.in_flight,
                "No AI completion within stall timeout, resetting in-flight counter"
            );
            state.in_flight = 0;
            state.last_completion = Instant::now();
        }
    }

    /// Counters for the status snapshot
    pub async fn snapshot(&self) -> DispatcherSnapshot {
        let state = self.state.lock().await;
        DispatcherSnapshot {
            enabled: state.enabled,
            in_flight: state.in_flight,
            consecutive_errors: state.consecutive_errors,
            requests_this_minute: state.window_count,
        }
    }

    /// Undo an admission whose send never happened
    async fn abort_in_flight(&self) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

impl Default for DetectionDispatcher {
    fn default() -> Self {
        Self::new(DispatchPolicy::default())
    }
}
