//! Recurring per-feed syncs: one cached fetch, normalize, upsert.
//!
//! These run once per scheduler tick on small payloads, so there is no
//! chunking, no archive fallback and no rate governor here.
use reqwest::Url;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

use crate::clock::Clock;
use crate::config::{Config, FeedEndpoint, Feeds};
use crate::error::{FetchError, SyncError};
use crate::http::{redact, HttpFetch};
use crate::model::{AlertRecord, ContentKind, SyncTally};
use crate::nasa::model::{ApodPayload, NeoFeed};
use crate::nasa::{keyed_url, KeyRing};
use crate::store::{ContentStore, ResponseCache, SyncLedger};
use crate::upsert::UpsertEngine;

pub mod alerts;
pub mod journal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feed {
    Apod,
    Cme,
    SolarFlare,
    SpaceWeather,
    Geomagnetic,
    Neo,
    PhotoJournal,
}

impl Feed {
    pub const ALL: [Feed; 7] = [
        Feed::Apod,
        Feed::Cme,
        Feed::SolarFlare,
        Feed::SpaceWeather,
        Feed::Geomagnetic,
        Feed::Neo,
        Feed::PhotoJournal,
    ];

    /// Command-line name.
    pub fn name(&self) -> &'static str {
        match self {
            Feed::Apod => "apod",
            Feed::Cme => "cme",
            Feed::SolarFlare => "solar-flare",
            Feed::SpaceWeather => "space-weather",
            Feed::Geomagnetic => "geomagnetic",
            Feed::Neo => "neo",
            Feed::PhotoJournal => "photo-journal",
        }
    }

    pub fn parse_feed(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase().replace('_', "-");
        Feed::ALL.into_iter().find(|f| f.name() == s)
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Feed::Apod => ContentKind::Apod,
            Feed::Cme => ContentKind::Cme,
            Feed::SolarFlare => ContentKind::SolarFlare,
            Feed::SpaceWeather => ContentKind::SpaceWeather,
            Feed::Geomagnetic => ContentKind::Geomagnetic,
            Feed::Neo => ContentKind::Neo,
            Feed::PhotoJournal => ContentKind::PhotoJournal,
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    pub feeds: Feeds,
    pub api_keys: Vec<String>,
    pub cache_ttl: Duration,
}

impl FeedSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            feeds: cfg.feeds.clone(),
            api_keys: cfg.api.keys.clone(),
            cache_ttl: Duration::from_secs(cfg.app.cache_ttl_seconds),
        }
    }

    pub fn endpoint(&self, feed: Feed) -> &FeedEndpoint {
        let f = &self.feeds;
        match feed {
            Feed::Apod => &f.apod,
            Feed::Cme => &f.cme,
            Feed::SolarFlare => &f.solar_flare,
            Feed::SpaceWeather => &f.space_weather,
            Feed::Geomagnetic => &f.geomagnetic,
            Feed::Neo => &f.neo,
            Feed::PhotoJournal => &f.photo_journal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedReport {
    pub feed: Feed,
    pub tally: SyncTally,
    /// Served from the response cache without a network request.
    pub cached: bool,
}

#[derive(Debug)]
pub struct FeedFailure {
    pub feed: Feed,
    pub error: SyncError,
}

#[derive(Debug, Default)]
pub struct SyncAllReport {
    pub succeeded: Vec<FeedReport>,
    pub failed: Vec<FeedFailure>,
}

pub struct FeedSyncer {
    fetcher: Arc<dyn HttpFetch>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ContentStore>,
    cache: Arc<dyn ResponseCache>,
    ledger: Arc<dyn SyncLedger>,
    settings: FeedSettings,
}

impl FeedSyncer {
    pub fn new(
        fetcher: Arc<dyn HttpFetch>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ContentStore>,
        cache: Arc<dyn ResponseCache>,
        ledger: Arc<dyn SyncLedger>,
        settings: FeedSettings,
    ) -> Self {
        Self {
            fetcher,
            clock,
            store,
            cache,
            ledger,
            settings,
        }
    }

    /// Sync one feed. Runs even when the feed is disabled in configuration.
    #[instrument(skip_all, fields(feed = %feed))]
    pub async fn sync(&self, feed: Feed) -> Result<FeedReport, SyncError> {
        let url = self.feed_url(feed)?;
        let (body, cached) = self.fetch_cached(feed, &url).await?;

        let upserts = UpsertEngine::new(self.store.as_ref());
        let mut tally = SyncTally::default();
        if feed == Feed::Apod {
            let payload: ApodPayload = serde_json::from_slice(&body).map_err(FetchError::from)?;
            for entry in payload.into_entries() {
                tally.record(upserts.upsert_photo(&entry.into_record()).await);
            }
        } else {
            for record in self.normalize(feed, &body)? {
                tally.record(upserts.upsert_alert(&record).await);
            }
        }

        self.ledger
            .record_run(feed.name(), self.clock.now(), &tally.summary_line())
            .await?;
        info!(summary = %tally.summary_line(), cached, "feed synced");
        Ok(FeedReport {
            feed,
            tally,
            cached,
        })
    }

    /// Sync every enabled feed in order, continuing past failures.
    pub async fn sync_all(&self) -> SyncAllReport {
        let mut report = SyncAllReport::default();
        for feed in Feed::ALL {
            if !self.settings.endpoint(feed).enabled {
                debug!(%feed, "feed disabled; skipping");
                continue;
            }
            match self.sync(feed).await {
                Ok(r) => report.succeeded.push(r),
                Err(err) => {
                    error!(%feed, %err, "feed sync failed");
                    report.failed.push(FeedFailure { feed, error: err });
                }
            }
        }
        report
    }

    fn feed_url(&self, feed: Feed) -> Result<Url, SyncError> {
        let endpoint = self.settings.endpoint(feed);
        let base = Url::parse(&endpoint.url)
            .map_err(|e| SyncError::Configuration(format!("{feed} url: {e}")))?;

        let key = if endpoint.requires_key {
            let mut ring = KeyRing::new(&self.settings.api_keys).ok_or_else(|| {
                SyncError::Configuration(format!("no API key configured for {feed}"))
            })?;
            Some(ring.next_key().to_string())
        } else {
            None
        };

        let mut url = keyed_url(&base, key.as_deref());
        if feed == Feed::Neo {
            let today = self.clock.now().date_naive().format("%Y-%m-%d").to_string();
            url.query_pairs_mut()
                .append_pair("start_date", &today)
                .append_pair("end_date", &today);
        }
        Ok(url)
    }

    /// Fresh cache entry if any, else one GET whose 200 body is cached for `cache_ttl`.
    async fn fetch_cached(&self, feed: Feed, url: &Url) -> Result<(Vec<u8>, bool), SyncError> {
        let cache_key = format!("{}:{}", feed.name(), redact(url));
        let now = self.clock.now();
        if let Some(body) = self.cache.get_fresh(&cache_key, now).await? {
            debug!(%feed, "response cache hit");
            return Ok((body, true));
        }

        let res = self.fetcher.get(url).await.map_err(FetchError::from)?;
        if !res.is_ok() {
            return Err(FetchError::Upstream { status: res.status }.into());
        }
        let ttl = chrono::Duration::from_std(self.settings.cache_ttl)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.cache.put(&cache_key, &res.body, now + ttl).await?;
        Ok((res.body, false))
    }

    fn normalize(&self, feed: Feed, body: &[u8]) -> Result<Vec<AlertRecord>, SyncError> {
        let records = match feed {
            Feed::Cme => alerts::cme_records(&json_array(body)?),
            Feed::SolarFlare => alerts::flare_records(&json_array(body)?),
            Feed::SpaceWeather => alerts::notification_records(&json_array(body)?),
            Feed::Neo => {
                let feed: NeoFeed = serde_json::from_slice(body).map_err(FetchError::from)?;
                alerts::neo_records(&feed)
            }
            Feed::Geomagnetic => {
                let text = String::from_utf8_lossy(body);
                vec![alerts::geomagnetic_record(&text, self.clock.now().date_naive())]
            }
            Feed::PhotoJournal => {
                let items = journal::parse_rss(&String::from_utf8_lossy(body))?;
                journal::journal_records(&items)
            }
            Feed::Apod => Vec::new(),
        };
        Ok(records)
    }
}

/// Some feeds answer an empty window with an empty body instead of `[]`.
fn json_array(body: &[u8]) -> Result<Vec<Value>, FetchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(body)?)
}
