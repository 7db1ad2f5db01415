//! Historical backfill of the daily-photo feed.
//!
//! A run walks the requested range chunk by chunk: each chunk is one governed
//! API request, and a chunk whose request fails is re-read day by day from the
//! public archive. Every record goes through the upsert engine, every calendar
//! day produces exactly one progress tick, and the pacer cools down every
//! `batch_size` chunks. A run only aborts on configuration or range errors.
use chrono::NaiveDate;
use reqwest::Url;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::archive::{ArchiveScraper, DayScrape, PageExtractor, RegexExtractor, ARCHIVE_PAGE_PREFIX, SCRAPE_DELAY};
use crate::chunker::{total_days, Chunk, DateChunks, DAYS_PER_REQUEST};
use crate::cleanup::{run_cleanup, CleanupReport};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::SyncError;
use crate::governor::{RateGovernor, RATE_LIMIT};
use crate::http::HttpFetch;
use crate::imagery::{ImageryBackfill, ImageryReport};
use crate::model::{BackfillRequest, SyncTally};
use crate::nasa::model::ApodPayload;
use crate::nasa::{range_url, ApiClient, KeyRing, APOD_ENDPOINT, RATE_LIMIT_BACKOFF};
use crate::pacer::{BatchPacer, BATCH_PAUSE, BATCH_SIZE};
use crate::progress::{DayOutcome, ProgressReporter, SyncEvent};
use crate::store::ContentStore;
use crate::upsert::UpsertEngine;

/// Tunables of a backfill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSettings {
    pub apod_endpoint: Url,
    pub archive_page_prefix: String,
    pub days_per_request: u32,
    pub rate_limit_per_hour: u32,
    pub batch_size: u32,
    pub batch_pause: Duration,
    pub rate_limit_backoff: Duration,
    pub max_rate_limit_retries: Option<u32>,
    pub scrape_delay: Duration,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            apod_endpoint: Url::parse(APOD_ENDPOINT).expect("valid default endpoint"),
            archive_page_prefix: ARCHIVE_PAGE_PREFIX.to_string(),
            days_per_request: DAYS_PER_REQUEST,
            rate_limit_per_hour: RATE_LIMIT,
            batch_size: BATCH_SIZE,
            batch_pause: BATCH_PAUSE,
            rate_limit_backoff: RATE_LIMIT_BACKOFF,
            max_rate_limit_retries: None,
            scrape_delay: SCRAPE_DELAY,
        }
    }
}

impl BackfillSettings {
    pub fn from_config(cfg: &Config) -> Result<Self, SyncError> {
        let apod_endpoint = Url::parse(&cfg.feeds.apod.url)
            .map_err(|e| SyncError::Configuration(format!("feeds.apod.url: {e}")))?;
        let b = &cfg.backfill;
        Ok(Self {
            apod_endpoint,
            archive_page_prefix: cfg.api.archive_page_prefix.clone(),
            days_per_request: b.days_per_request,
            rate_limit_per_hour: b.rate_limit_per_hour,
            batch_size: b.batch_size,
            batch_pause: Duration::from_secs(b.batch_pause_seconds),
            rate_limit_backoff: Duration::from_secs(b.rate_limit_backoff_seconds),
            max_rate_limit_retries: b.max_rate_limit_retries,
            scrape_delay: Duration::from_millis(b.scrape_delay_ms),
        })
    }
}

/// Per-run pacing state. Created fresh for every run, never persisted.
#[derive(Debug, Clone)]
pub struct RunState {
    pub governor: RateGovernor,
    pub pacer: BatchPacer,
}

impl RunState {
    fn new(settings: &BackfillSettings, clock: &dyn Clock) -> Self {
        Self {
            governor: RateGovernor::new(settings.rate_limit_per_hour, clock.now()),
            pacer: BatchPacer::new(settings.batch_size, settings.batch_pause),
        }
    }
}

/// Outcome of `sync-historical` / `sync-both-historical`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalReport {
    pub tally: SyncTally,
    pub imagery: Option<ImageryReport>,
    pub cleanup: CleanupReport,
}

pub struct BackfillService {
    fetcher: Arc<dyn HttpFetch>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ContentStore>,
    reporter: Arc<dyn ProgressReporter>,
    extractor: Arc<dyn PageExtractor>,
    settings: BackfillSettings,
}

impl BackfillService {
    pub fn new(
        fetcher: Arc<dyn HttpFetch>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ContentStore>,
        reporter: Arc<dyn ProgressReporter>,
        settings: BackfillSettings,
    ) -> Self {
        Self {
            fetcher,
            clock,
            store,
            reporter,
            extractor: Arc::new(RegexExtractor),
            settings,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn settings(&self) -> &BackfillSettings {
        &self.settings
    }

    /// Data phase only: chunks, fallback, upserts and ticks. No cleanup.
    #[instrument(skip_all, fields(start = %request.start_date, end = %request.end_date))]
    pub async fn run(&self, request: &BackfillRequest) -> Result<SyncTally, SyncError> {
        if request.start_date > request.end_date {
            return Err(SyncError::InvalidRange {
                start: request.start_date,
                end: request.end_date,
            });
        }
        let mut keys = KeyRing::new(&request.api_keys)
            .ok_or_else(|| SyncError::Configuration("no API key configured".into()))?;

        let clock = self.clock.as_ref();
        let client = ApiClient::new(self.fetcher.as_ref(), clock)
            .with_backoff(self.settings.rate_limit_backoff)
            .with_max_rate_limit_retries(self.settings.max_rate_limit_retries);
        let scraper = ArchiveScraper::new(
            self.fetcher.as_ref(),
            clock,
            self.extractor.as_ref(),
            &self.settings.archive_page_prefix,
        )
        .with_delay(self.settings.scrape_delay);
        let upserts = UpsertEngine::new(self.store.as_ref());

        let mut state = RunState::new(&self.settings, clock);
        let mut tally = SyncTally::default();
        self.reporter.report(&SyncEvent::RunStarted {
            start: request.start_date,
            end: request.end_date,
            total_days: total_days(request.start_date, request.end_date),
        });

        let chunks = DateChunks::new(
            request.start_date,
            request.end_date,
            self.settings.days_per_request,
        );
        for chunk in chunks {
            self.reporter.report(&SyncEvent::ChunkStarted(chunk));
            let url = range_url(&self.settings.apod_endpoint, keys.next_key(), chunk.start, chunk.end);
            match client.fetch_json::<ApodPayload>(&url, &mut state.governor).await {
                Ok(payload) => {
                    self.ingest_api_chunk(chunk, payload, &upserts, &mut tally)
                        .await
                }
                Err(err) => {
                    tally.failed_chunks += 1;
                    self.reporter.report(&SyncEvent::ChunkFailed {
                        chunk,
                        reason: err.to_string(),
                    });
                    self.scrape_chunk(chunk, &scraper, &upserts, &mut tally)
                        .await;
                }
            }
            state.pacer.after_chunk(clock).await;
        }

        tally.requests_made = state.governor.total_requests();
        Ok(tally)
    }

    /// Ticks once per returned record up to the chunk's day count, then pads
    /// the days the API did not cover with `Missing`.
    async fn ingest_api_chunk(
        &self,
        chunk: Chunk,
        payload: ApodPayload,
        upserts: &UpsertEngine<'_>,
        tally: &mut SyncTally,
    ) {
        let days = chunk.len_days();
        let mut ticked: BTreeSet<NaiveDate> = BTreeSet::new();
        let mut ticks = 0usize;

        for entry in payload.into_entries() {
            let record = entry.into_record();
            let outcome = upserts.upsert_photo(&record).await;
            tally.record(outcome);
            if ticks < days {
                ticks += 1;
                ticked.insert(record.date);
                self.reporter.report(&SyncEvent::Tick {
                    date: record.date,
                    outcome: DayOutcome::Upserted(outcome),
                });
            }
        }

        let missing: Vec<NaiveDate> = chunk
            .days()
            .filter(|d| !ticked.contains(d))
            .take(days - ticks)
            .collect();
        for date in missing {
            self.reporter.report(&SyncEvent::Tick {
                date,
                outcome: DayOutcome::Missing,
            });
        }
    }

    async fn scrape_chunk(
        &self,
        chunk: Chunk,
        scraper: &ArchiveScraper<'_>,
        upserts: &UpsertEngine<'_>,
        tally: &mut SyncTally,
    ) {
        for date in chunk.days() {
            let outcome = match scraper.scrape_day(date).await {
                DayScrape::Record(record) => {
                    let outcome = upserts.upsert_photo(&record).await;
                    tally.record(outcome);
                    DayOutcome::Upserted(outcome)
                }
                DayScrape::Dropped(_) => {
                    tally.dropped += 1;
                    DayOutcome::Dropped
                }
                DayScrape::FetchFailed => DayOutcome::FetchFailed,
            };
            self.reporter.report(&SyncEvent::Tick { date, outcome });
        }
    }

    /// `sync-historical`: data phase, then cleanup, then the summary.
    pub async fn sync_historical(
        &self,
        request: &BackfillRequest,
    ) -> Result<HistoricalReport, SyncError> {
        let tally = self.run(request).await?;
        Ok(self.finish(tally, None).await)
    }

    /// `sync-both-historical`: data phase, imagery phase, then one cleanup.
    /// `imagery` is `None` in the report when the imagery phase failed.
    pub async fn sync_both_historical(
        &self,
        request: &BackfillRequest,
        imagery: &ImageryBackfill,
    ) -> Result<HistoricalReport, SyncError> {
        let tally = self.run(request).await?;
        let images = match imagery.run().await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(%err, "imagery phase failed");
                None
            }
        };
        Ok(self.finish(tally, images).await)
    }

    /// Cleanup failures are logged, never raised, so the summary always goes out.
    async fn finish(&self, tally: SyncTally, imagery: Option<ImageryReport>) -> HistoricalReport {
        let cleanup = run_cleanup(self.store.as_ref()).await;
        self.reporter.report(&SyncEvent::Cleanup(cleanup));
        self.reporter.report(&SyncEvent::Summary(tally.clone()));
        info!(summary = %tally.summary_line(), "historical sync complete");
        HistoricalReport {
            tally,
            imagery,
            cleanup,
        }
    }
}
