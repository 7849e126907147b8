//! FrameIngest - Latest-wins Frame Buffer
//!
//! ## Responsibilities
//!
//! - Keep exactly one buffered frame per camera (overwrite on arrival)
//! - Best-effort per-camera FPS estimate for observability
//!
//! Staleness is worse than loss for live viewing, so there is no queue
//! and no history: a new frame simply replaces the previous one. The
//! FPS estimate is computed over 5 second windows and never affects
//! control flow.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

const FPS_WINDOW: Duration = Duration::from_secs(5);

/// A buffered camera frame
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    /// Raw JPEG bytes
    pub data: Vec<u8>,
    /// Monotonic arrival time
    pub arrived_at: Instant,
}

/// Per-camera ingest bookkeeping
struct CameraSlot {
    frame: BufferedFrame,
    window_start: Instant,
    frames_in_window: u32,
    fps: f32,
}

/// FrameIngest instance
pub struct FrameIngest {
    slots: RwLock<HashMap<String, CameraSlot>>,
}

impl FrameIngest {
    /// Create new FrameIngest
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Store a frame for a camera, overwriting any buffered one
    pub async fn store(&self, camera_id: &str, data: Vec<u8>) {
        let now = Instant::now();
        let mut slots = self.slots.write().await;

        match slots.get_mut(camera_id) {
            Some(slot) => {
                slot.frame = BufferedFrame {
                    data,
                    arrived_at: now,
                };
                slot.frames_in_window += 1;

                let elapsed = now.duration_since(slot.window_start);
                if elapsed >= FPS_WINDOW {
                    slot.fps = slot.frames_in_window as f32 / elapsed.as_secs_f32();
                    slot.window_start = now;
                    slot.frames_in_window = 0;
                    tracing::trace!(camera_id = %camera_id, fps = slot.fps, "Frame rate window rolled");
                }
            }
            None => {
                slots.insert(
                    camera_id.to_string(),
                    CameraSlot {
                        frame: BufferedFrame {
                            data,
                            arrived_at: now,
                        },
                        window_start: now,
                        frames_in_window: 1,
                        fps: 0.0,
                    },
                );
            }
        }
    }

    /// Latest buffered frame for a camera
    pub async fn latest(&self, camera_id: &str) -> Option<BufferedFrame> {
        self.slots.read().await.get(camera_id).map(|s| s.frame.clone())
    }

    /// Current FPS estimate for a camera (0.0 until a window completes)
    pub async fn fps(&self, camera_id: &str) -> Option<f32> {
        self.slots.read().await.get(camera_id).map(|s| s.fps)
    }

    /// FPS estimates for every camera with a buffered frame, for the
    /// status snapshot
    pub async fn fps_snapshot(&self) -> HashMap<String, f32> {
        self.slots
            .read()
            .await
            .iter()
            .map(|(id, slot)| (id.clone(), slot.fps))
            .collect()
    }

    /// Drop a camera's slot (camera closed)
    pub async fn remove(&self, camera_id: &str) {
        self.slots.write().await.remove(camera_id);
    }

    /// Number of cameras with a buffered frame
    pub async fn camera_count(&self) -> usize {
        self.slots.read().await.len()
    }
}

impl Default for FrameIngest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_wins_overwrite() {
        let ingest = FrameIngest::new();
        ingest.store("cam1", vec![1, 2, 3]).await;
        ingest.store("cam1", vec![4, 5, 6]).await;

        let frame = ingest.latest("cam1").await.unwrap();
        assert_eq!(frame.data, vec![4, 5, 6]);
        assert_eq!(ingest.camera_count().await, 1);
    }

    #[tokio::test]
    async fn test_no_frame_for_unknown_camera() {
        let ingest = FrameIngest::new();
        assert!(ingest.latest("nope").await.is_none());
        assert!(ingest.fps("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_drops_slot() {
        let ingest = FrameIngest::new();
        ingest.store("cam1", vec![0xff]).await;
        ingest.remove("cam1").await;
        assert!(ingest.latest("cam1").await.is_none());
    }

    #[tokio::test]
    async fn test_fps_snapshot_covers_all_cameras() {
        let ingest = FrameIngest::new();
        ingest.store("cam1", vec![0]).await;
        ingest.store("cam2", vec![0]).await;

        let snapshot = ingest.fps_snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("cam1"));
        assert!(snapshot.contains_key("cam2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fps_estimate_over_window() {
        let ingest = FrameIngest::new();
        ingest.store("cam1", vec![0]).await;
        // 0.0 until the first window completes
        assert_eq!(ingest.fps("cam1").await, Some(0.0));

        // 10 frames/sec for a little over the 5s window
        for _ in 0..51 {
            tokio::time::advance(Duration::from_millis(100)).await;
            ingest.store("cam1", vec![0]).await;
        }

        let fps = ingest.fps("cam1").await.unwrap();
        assert!((fps - 10.0).abs() < 1.0, "fps estimate was {fps}");
    }
}
