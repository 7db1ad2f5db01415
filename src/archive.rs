//! Day-by-day fallback against the public HTML archive.
//!
//! Used only when the structured API fails for a whole chunk. Extraction is
//! pattern based and lives behind [`PageExtractor`], so it can be replaced
//! without touching the chunking, pacing, or upsert logic around it.
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::http::HttpFetch;
use crate::model::{MediaType, NormalizedRecord};

pub const ARCHIVE_PAGE_PREFIX: &str = "https://apod.nasa.gov/apod/ap";
pub const SCRAPE_DELAY: Duration = Duration::from_millis(100);

/// `<prefix><yy><mm><dd>.html`
pub fn archive_page_url(prefix: &str, date: NaiveDate) -> Option<Url> {
    Url::parse(&format!("{}{}.html", prefix, date.format("%y%m%d"))).ok()
}

/// A fetched archive page.
#[derive(Debug, Clone)]
pub struct ArchivePage {
    pub date: NaiveDate,
    pub url: Url,
    pub html: String,
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ArchiveParseError {
    #[error("no title found")]
    MissingTitle,
    #[error("no image or video found")]
    MissingMedia,
}

pub trait PageExtractor: Send + Sync {
    fn extract(&self, page: &ArchivePage) -> Result<NormalizedRecord, ArchiveParseError>;
}

static TITLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title>\s*APOD:[^<]*?-\s*(.*?)\s*</title>").expect("valid regex"));
static CENTER_BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<center>\s*<b>(.*?)</b>").expect("valid regex"));
static IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<img\s[^>]*?src\s*=\s*"([^"]+)""#).expect("valid regex"));
static HD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a\s+href\s*=\s*"(image/[^"]+)""#).expect("valid regex"));
static IFRAME_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<iframe\s[^>]*?src\s*=\s*"([^"]+)""#).expect("valid regex"));
static EXPLANATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<b>\s*Explanation:\s*</b>(.*?)(?:Tomorrow(?:'|&#39;|&rsquo;)s\s+picture|</body>)")
        .expect("valid regex")
});
static CREDIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<b>([^<]*Credit[^<]*)</b>(.*?)</center>").expect("valid regex"));
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("valid regex"));
static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip tags, decode entities and collapse whitespace.
pub fn clean_text(html: &str) -> String {
    let no_tags = TAGS.replace_all(html, " ");
    let decoded = html_escape::decode_html_entities(&no_tags);
    WS.replace_all(&decoded, " ").trim().to_string()
}

/// Pattern-matching extractor for the archive's page layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexExtractor;

impl RegexExtractor {
    fn title(html: &str) -> Option<String> {
        TITLE_TAG
            .captures(html)
            .or_else(|| CENTER_BOLD.captures(html))
            .map(|c| clean_text(&c[1]))
            .filter(|t| !t.is_empty())
    }

    fn media(page: &ArchivePage) -> Option<(MediaType, String, Option<String>)> {
        let resolve = |raw: &str| page.url.join(raw.trim()).ok().map(|u| u.to_string());

        if let Some(c) = IFRAME_SRC.captures(&page.html) {
            return resolve(&c[1]).map(|u| (MediaType::Video, u, None));
        }
        let src = IMG_SRC.captures(&page.html)?;
        let media_url = resolve(&src[1])?;
        let hd = HD_LINK.captures(&page.html).and_then(|c| resolve(&c[1]));
        Some((MediaType::Image, media_url, hd))
    }

    fn copyright(html: &str) -> Option<String> {
        let c = CREDIT.captures(html)?;
        if !c[1].to_ascii_lowercase().contains("copyright") {
            return None;
        }
        Some(clean_text(&c[2])).filter(|s| !s.is_empty())
    }
}

impl PageExtractor for RegexExtractor {
    fn extract(&self, page: &ArchivePage) -> Result<NormalizedRecord, ArchiveParseError> {
        let title = Self::title(&page.html).ok_or(ArchiveParseError::MissingTitle)?;
        let (media_type, media_url, hd_media_url) =
            Self::media(page).ok_or(ArchiveParseError::MissingMedia)?;
        let explanation = EXPLANATION
            .captures(&page.html)
            .map(|c| clean_text(&c[1]))
            .unwrap_or_default();

        Ok(NormalizedRecord {
            date: page.date,
            title,
            explanation,
            media_url,
            hd_media_url,
            media_type,
            copyright: Self::copyright(&page.html),
        })
    }
}

/// Result of scraping one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayScrape {
    Record(NormalizedRecord),
    /// Page fetched but lacked a title or media. Counts as neither success nor failure.
    Dropped(ArchiveParseError),
    FetchFailed,
}

pub struct ArchiveScraper<'a> {
    fetcher: &'a dyn HttpFetch,
    clock: &'a dyn Clock,
    extractor: &'a dyn PageExtractor,
    page_prefix: &'a str,
    delay: Duration,
}

impl<'a> ArchiveScraper<'a> {
    pub fn new(
        fetcher: &'a dyn HttpFetch,
        clock: &'a dyn Clock,
        extractor: &'a dyn PageExtractor,
        page_prefix: &'a str,
    ) -> Self {
        Self {
            fetcher,
            clock,
            extractor,
            page_prefix,
            delay: SCRAPE_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fetch and extract one day, then wait the fixed inter-request delay.
    pub async fn scrape_day(&self, date: NaiveDate) -> DayScrape {
        let outcome = self.fetch_and_extract(date).await;
        self.clock.sleep(self.delay).await;
        outcome
    }

    async fn fetch_and_extract(&self, date: NaiveDate) -> DayScrape {
        let Some(url) = archive_page_url(self.page_prefix, date) else {
            warn!(prefix = self.page_prefix, %date, "invalid archive page URL");
            return DayScrape::FetchFailed;
        };
        let res = match self.fetcher.get(&url).await {
            Ok(res) if res.is_ok() => res,
            Ok(res) => {
                debug!(%url, status = res.status, "archive page unavailable");
                return DayScrape::FetchFailed;
            }
            Err(err) => {
                debug!(%url, %err, "archive page fetch failed");
                return DayScrape::FetchFailed;
            }
        };

        let page = ArchivePage {
            date,
            url,
            html: res.text().into_owned(),
        };
        match self.extractor.extract(&page) {
            Ok(record) => DayScrape::Record(record),
            Err(err) => {
                debug!(url = %page.url, %err, "archive page dropped");
                DayScrape::Dropped(err)
            }
        }
    }
}
