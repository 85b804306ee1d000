//! Action pacer: enforces a minimum gap between consecutive UI actions.
//!
//! The traversal drives a single cursor, so there is no concurrency limit
//! here, only spacing. Client frameworks that re-render asynchronously drop
//! clicks that arrive faster than they can process them.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct Pacer {
    min_gap: Duration,
    last_action: Mutex<Option<Instant>>,
}

impl Pacer {
    /// `min_gap_ms`: minimum milliseconds between the starts of two actions.
    pub fn new(min_gap_ms: u64) -> Self {
        Self {
            min_gap: Duration::from_millis(min_gap_ms),
            last_action: Mutex::new(None),
        }
    }

    /// Wait until the next action is allowed, then claim the slot.
    pub async fn pace(&self) {
        let mut last = self.last_action.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_gap {
                tokio::time::sleep(self.min_gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
