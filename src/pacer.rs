use std::time::Duration;
use tracing::info;

use crate::clock::Clock;

pub const BATCH_SIZE: u32 = 50;
pub const BATCH_PAUSE: Duration = Duration::from_secs(5);

/// Cooldown every `batch_size` chunk requests, on top of the hourly quota.
#[derive(Debug, Clone)]
pub struct BatchPacer {
    batch_size: u32,
    pause: Duration,
    batch_count: u32,
}

impl BatchPacer {
    pub fn new(batch_size: u32, pause: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pause,
            batch_count: 0,
        }
    }

    pub fn batch_count(&self) -> u32 {
        self.batch_count
    }

    /// Count one chunk request, successful or not. Returns true when it paused.
    pub async fn after_chunk(&mut self, clock: &dyn Clock) -> bool {
        self.batch_count += 1;
        if self.batch_count < self.batch_size {
            return false;
        }
        info!(
            pause_secs = self.pause.as_secs_f64(),
            "batch of {} requests complete; cooling down", self.batch_size
        );
        clock.sleep(self.pause).await;
        self.batch_count = 0;
        true
    }
}
