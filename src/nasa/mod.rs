use chrono::NaiveDate;
use reqwest::Url;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::FetchError;
use crate::governor::RateGovernor;
use crate::http::{redact, HttpFetch};

pub mod model;

pub const APOD_ENDPOINT: &str = "https://api.nasa.gov/planetary/apod";
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

/// `<endpoint>?api_key=<key>&start_date=<YYYY-MM-DD>&end_date=<YYYY-MM-DD>`
pub fn range_url(endpoint: &Url, api_key: &str, start: NaiveDate, end: NaiveDate) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("api_key", api_key)
        .append_pair("start_date", &start.format("%Y-%m-%d").to_string())
        .append_pair("end_date", &end.format("%Y-%m-%d").to_string());
    url
}

/// Feed URL with an optional key appended.
pub fn keyed_url(endpoint: &Url, api_key: Option<&str>) -> Url {
    let mut url = endpoint.clone();
    if let Some(key) = api_key {
        url.query_pairs_mut().append_pair("api_key", key);
    }
    url
}

/// Round-robin over the configured API keys, one key per chunk request.
#[derive(Debug, Clone)]
pub struct KeyRing {
    keys: Vec<String>,
    next: usize,
}

impl KeyRing {
    /// `None` when no usable key is configured.
    pub fn new(keys: &[String]) -> Option<Self> {
        let keys: Vec<String> = keys
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            return None;
        }
        Some(Self { keys, next: 0 })
    }

    pub fn next_key(&mut self) -> &str {
        let idx = self.next % self.keys.len();
        self.next = self.next.wrapping_add(1);
        &self.keys[idx]
    }
}

/// Issues governed API requests and retries on HTTP 429.
pub struct ApiClient<'a> {
    fetcher: &'a dyn HttpFetch,
    clock: &'a dyn Clock,
    backoff: Duration,
    max_rate_limit_retries: Option<u32>,
}

impl<'a> ApiClient<'a> {
    pub fn new(fetcher: &'a dyn HttpFetch, clock: &'a dyn Clock) -> Self {
        Self {
            fetcher,
            clock,
            backoff: RATE_LIMIT_BACKOFF,
            max_rate_limit_retries: None,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Cap consecutive 429 retries. Unbounded when `None`.
    pub fn with_max_rate_limit_retries(mut self, max: Option<u32>) -> Self {
        self.max_rate_limit_retries = max;
        self
    }

    /// GET `url` and decode the JSON body. Every attempt passes the governor;
    /// an attempt that is rate limited and retried does not count in its total.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        governor: &mut RateGovernor,
    ) -> Result<T, FetchError> {
        let mut rate_limited: u32 = 0;
        loop {
            governor.before_request(self.clock).await;
            governor.record_request();

            let res = self.fetcher.get(url).await?;
            match res.status {
                200 => {
                    debug!(url = %redact(url), bytes = res.body.len(), "api response");
                    return Ok(serde_json::from_slice(&res.body)?);
                }
                429 => {
                    rate_limited += 1;
                    if let Some(max) = self.max_rate_limit_retries {
                        if rate_limited > max {
                            return Err(FetchError::RateLimited {
                                attempts: rate_limited,
                            });
                        }
                    }
                    warn!(
                        url = %redact(url),
                        attempt = rate_limited,
                        backoff_secs = self.backoff.as_secs(),
                        "rate limited by upstream; backing off"
                    );
                    self.clock.sleep(self.backoff).await;
                    governor.rate_limited(self.clock.now());
                }
                status => return Err(FetchError::Upstream { status }),
            }
        }
    }
}
