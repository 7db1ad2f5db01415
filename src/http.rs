//! Outbound HTTP seam shared by the API client, the archive scraper, the
//! recurring feeds and the imagery download.
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use crate::error::TransportError;

const USER_AGENT: &str = concat!("skyfeed-sync/", env!("CARGO_PKG_VERSION"));

/// Status and raw body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError>;
}

#[derive(Clone)]
pub struct ReqwestFetcher {
    http: Client,
    timeout: Duration,
}

impl fmt::Debug for ReqwestFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestFetcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration, max_redirects: usize) -> Result<Self, TransportError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .redirect(Policy::limited(max_redirects))
            .build()?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        let res = self.http.get(url.clone()).send().await?;
        let status = res.status().as_u16();
        let body = res.bytes().await?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

/// Render a URL for logs with the `api_key` query value masked.
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "api_key" { "[REDACTED]".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return shown.to_string();
    }
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}
