//! Structured progress events for backfill runs and their renderers.
use chrono::NaiveDate;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::chunker::Chunk;
use crate::cleanup::CleanupReport;
use crate::model::{SyncTally, UpsertOutcome};

/// What happened to one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOutcome {
    Upserted(UpsertOutcome),
    /// Archive page fetched but unusable.
    Dropped,
    /// Archive page could not be fetched.
    FetchFailed,
    /// The API answered for the chunk but returned no record for this day.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    RunStarted {
        start: NaiveDate,
        end: NaiveDate,
        total_days: usize,
    },
    ChunkStarted(Chunk),
    ChunkFailed {
        chunk: Chunk,
        reason: String,
    },
    /// Exactly one per calendar day of the run.
    Tick {
        date: NaiveDate,
        outcome: DayOutcome,
    },
    Cleanup(CleanupReport),
    Summary(SyncTally),
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &SyncEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn report(&self, _event: &SyncEvent) {}
}

#[derive(Debug, Default)]
struct Progress {
    total: usize,
    done: usize,
    next_decile: usize,
}

/// Logs run boundaries, failed chunks, every 10% of days, and the summary.
#[derive(Debug, Default)]
pub struct TracingReporter {
    progress: Mutex<Progress>,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) {
        let mut p = self.progress.lock().unwrap_or_else(|e| e.into_inner());
        p.done += 1;
        if p.total == 0 {
            return;
        }
        let pct = p.done * 100 / p.total;
        if pct >= p.next_decile * 10 {
            info!(done = p.done, total = p.total, "progress {}%", pct);
            p.next_decile = pct / 10 + 1;
        }
    }
}

impl ProgressReporter for TracingReporter {
    fn report(&self, event: &SyncEvent) {
        match event {
            SyncEvent::RunStarted {
                start,
                end,
                total_days,
            } => {
                let mut p = self.progress.lock().unwrap_or_else(|e| e.into_inner());
                *p = Progress {
                    total: *total_days,
                    done: 0,
                    next_decile: 1,
                };
                info!(%start, %end, days = total_days, "historical sync started");
            }
            SyncEvent::ChunkStarted(_) => {}
            SyncEvent::ChunkFailed { chunk, reason } => {
                warn!(start = %chunk.start, end = %chunk.end, %reason, "API chunk failed; falling back to archive pages");
            }
            SyncEvent::Tick { .. } => self.tick(),
            SyncEvent::Cleanup(report) => {
                info!(
                    removed = ?report.removed,
                    optimized = report.optimized,
                    "cleanup finished"
                );
            }
            SyncEvent::Summary(tally) => {
                info!(
                    inserted = tally.inserted,
                    updated = tally.updated,
                    skipped = tally.skipped,
                    failed = tally.failed,
                    dropped = tally.dropped,
                    failed_chunks = tally.failed_chunks,
                    requests = tally.requests_made,
                    "historical sync finished"
                );
            }
        }
    }
}
