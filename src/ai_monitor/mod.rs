//! AiMonitor - AI Worker Health Probe
//!
//! ## Responsibilities
//!
//! - Periodic HTTP probe of the AI worker's health endpoint
//! - Availability flag for /healthz and the status snapshot
//! - Backoff on startup failure: the hub never crashes because the
//!   worker is down; detection stays disabled until the worker's
//!   socket connects

use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// AiMonitor instance
pub struct AiMonitor {
    client: Client,
    health_url: String,
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl AiMonitor {
    /// Create new AiMonitor probing the given health URL
    pub fn new(health_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            health_url,
            healthy: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Whether the worker answered its last probe
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// One probe; updates the availability flag
    pub async fn probe(&self) -> bool {
        let ok = match self.client.get(&self.health_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        };

        let was_healthy = self.healthy.swap(ok, Ordering::Relaxed);
        if ok {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            if !was_healthy {
                tracing::info!(url = %self.health_url, "AI worker health probe succeeded");
            }
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if was_healthy || failures == 1 {
                tracing::warn!(url = %self.health_url, failures, "AI worker health probe failed");
            }
        }
        ok
    }

    /// Probe loop with exponential backoff while the worker is down
    pub async fn run(self: Arc<Self>) {
        loop {
            let ok = self.probe().await;
            let delay = if ok {
                PROBE_INTERVAL
            } else {
                backoff_delay(self.consecutive_failures.load(Ordering::Relaxed))
            };
            tokio::time::sleep(delay).await;
        }
    }
}

/// Exponential backoff, capped
fn backoff_delay(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    let delay = BACKOFF_BASE.saturating_mul(1u32 << exp);
    delay.min(BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(5));
        assert_eq!(backoff_delay(2), Duration::from_secs(10));
        assert_eq!(backoff_delay(3), Duration::from_secs(20));
        assert_eq!(backoff_delay(10), BACKOFF_CAP);
        assert_eq!(backoff_delay(u32::MAX), BACKOFF_CAP);
    }

    #[tokio::test]
    async fn test_unreachable_worker_marks_unhealthy() {
        // Reserved TEST-NET-1 address, nothing listens there
        let monitor = AiMonitor::new("http://192.0.2.1:1/health".to_string());
        assert!(!monitor.probe().await);
        assert!(!monitor.is_healthy());
    }
}
