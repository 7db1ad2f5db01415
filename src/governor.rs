//! Rolling one-hour request quota for the structured API.
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

use crate::clock::Clock;

pub const RATE_LIMIT: u32 = 1000;
pub const WINDOW: Duration = Duration::from_secs(3600);
pub const WAIT_BUFFER: Duration = Duration::from_secs(10);

/// In-process quota tracker. Does not coordinate across processes.
#[derive(Debug, Clone)]
pub struct RateGovernor {
    limit: u32,
    window: Duration,
    buffer: Duration,
    request_count: u32,
    window_start: DateTime<Utc>,
    total_requests: u64,
}

impl RateGovernor {
    pub fn new(limit: u32, now: DateTime<Utc>) -> Self {
        Self::with_window(limit, WINDOW, WAIT_BUFFER, now)
    }

    pub fn with_window(limit: u32, window: Duration, buffer: Duration, now: DateTime<Utc>) -> Self {
        Self {
            limit: limit.max(1),
            window,
            buffer,
            request_count: 0,
            window_start: now,
            total_requests: 0,
        }
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// Requests recorded over the governor's lifetime, minus attempts that
    /// were rate limited and retried.
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Gate an outbound API request. Returns how long it blocked, if at all.
    pub async fn before_request(&mut self, clock: &dyn Clock) -> Option<Duration> {
        let now = clock.now();
        let elapsed = (now - self.window_start).to_std().unwrap_or_default();

        if self.request_count >= self.limit {
            let mut waited = None;
            if elapsed < self.window {
                let wait = self.window - elapsed + self.buffer;
                warn!(
                    requests = self.request_count,
                    wait_secs = wait.as_secs(),
                    "hourly quota reached; waiting for the window to roll over"
                );
                clock.sleep(wait).await;
                waited = Some(wait);
            }
            self.reset(clock.now());
            return waited;
        }

        if elapsed >= self.window {
            self.reset(now);
        }
        None
    }

    pub fn record_request(&mut self) {
        self.request_count += 1;
        self.total_requests += 1;
    }

    /// Start a fresh window.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.request_count = 0;
        self.window_start = now;
    }

    /// Upstream answered 429 and the attempt will be retried: start a fresh
    /// window and drop that attempt from the lifetime total.
    pub fn rate_limited(&mut self, now: DateTime<Utc>) {
        self.total_requests = self.total_requests.saturating_sub(1);
        self.reset(now);
    }
}
