//! Configuration loader and validator for the feed sync.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Comma-separated API keys replacing `api.keys`.
pub const API_KEYS_ENV: &str = "SKYFEED_API_KEYS";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub api: Api,
    pub backfill: Backfill,
    pub feeds: Feeds,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub log_file: String,
    pub cache_ttl_seconds: u64,
    pub lock_ttl_seconds: u64,
}

/// Credentials and shared HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    #[serde(default)]
    pub keys: Vec<String>,
    pub archive_page_prefix: String,
    pub request_timeout_seconds: u64,
    pub max_redirects: usize,
}

/// Historical backfill pacing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backfill {
    pub days_per_request: u32,
    pub rate_limit_per_hour: u32,
    pub batch_size: u32,
    pub batch_pause_seconds: u64,
    pub rate_limit_backoff_seconds: u64,
    /// Unbounded when absent.
    #[serde(default)]
    pub max_rate_limit_retries: Option<u32>,
    pub scrape_delay_ms: u64,
}

/// One recurring feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedEndpoint {
    pub url: String,
    #[serde(default)]
    pub requires_key: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feeds {
    pub apod: FeedEndpoint,
    pub cme: FeedEndpoint,
    pub solar_flare: FeedEndpoint,
    pub space_weather: FeedEndpoint,
    pub geomagnetic: FeedEndpoint,
    pub neo: FeedEndpoint,
    pub photo_journal: FeedEndpoint,
}

impl Feeds {
    fn all(&self) -> [(&'static str, &FeedEndpoint); 7] {
        [
            ("feeds.apod.url must be an absolute URL", &self.apod),
            ("feeds.cme.url must be an absolute URL", &self.cme),
            ("feeds.solar_flare.url must be an absolute URL", &self.solar_flare),
            ("feeds.space_weather.url must be an absolute URL", &self.space_weather),
            ("feeds.geomagnetic.url must be an absolute URL", &self.geomagnetic),
            ("feeds.neo.url must be an absolute URL", &self.neo),
            ("feeds.photo_journal.url must be an absolute URL", &self.photo_journal),
        ]
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL`, else a SQLite file inside `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var(DATABASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| format!("sqlite://{}/skyfeed.db", self.app.data_dir))
    }

    pub fn media_dir(&self) -> PathBuf {
        Path::new(&self.app.data_dir).join("media")
    }

    /// Replace `api.keys` with a comma-separated override, if one is given.
    pub fn apply_key_override(&mut self, keys: Option<&str>) {
        let Some(raw) = keys else { return };
        let keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();
        if !keys.is_empty() {
            self.api.keys = keys;
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_key_override(std::env::var(API_KEYS_ENV).ok().as_deref());
    validate(&cfg)?;
    Ok(cfg)
}

fn is_absolute_url(s: &str) -> bool {
    Url::parse(s.trim()).map_or(false, |u| u.has_host())
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.log_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.log_file must be non-empty"));
    }
    if cfg.app.cache_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("app.cache_ttl_seconds must be > 0"));
    }
    if cfg.app.lock_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("app.lock_ttl_seconds must be > 0"));
    }

    // Keys may be empty here; syncs that need one fail with a configuration error.
    if !is_absolute_url(&cfg.api.archive_page_prefix) {
        return Err(ConfigError::Invalid("api.archive_page_prefix must be an absolute URL"));
    }
    if !(30..=60).contains(&cfg.api.request_timeout_seconds) {
        return Err(ConfigError::Invalid("api.request_timeout_seconds must be within 30..=60"));
    }
    if cfg.api.max_redirects > 10 {
        return Err(ConfigError::Invalid("api.max_redirects must be <= 10"));
    }

    let b = &cfg.backfill;
    if b.days_per_request == 0 {
        return Err(ConfigError::Invalid("backfill.days_per_request must be > 0"));
    }
    if b.rate_limit_per_hour == 0 {
        return Err(ConfigError::Invalid("backfill.rate_limit_per_hour must be > 0"));
    }
    if b.batch_size == 0 {
        return Err(ConfigError::Invalid("backfill.batch_size must be > 0"));
    }

    for (msg, feed) in cfg.feeds.all() {
        if !is_absolute_url(&feed.url) {
            return Err(ConfigError::Invalid(msg));
        }
    }

    Ok(())
}

/// Complete sample configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  log_file: "./data/skyfeed.log"
  cache_ttl_seconds: 1800
  lock_ttl_seconds: 21600

api:
  keys:
    - "DEMO_KEY"
  archive_page_prefix: "https://apod.nasa.gov/apod/ap"
  request_timeout_seconds: 30
  max_redirects: 3

backfill:
  days_per_request: 50
  rate_limit_per_hour: 1000
  batch_size: 50
  batch_pause_seconds: 5
  rate_limit_backoff_seconds: 60
  scrape_delay_ms: 100

feeds:
  apod:
    url: "https://api.nasa.gov/planetary/apod"
    requires_key: true
  cme:
    url: "https://api.nasa.gov/DONKI/CME"
    requires_key: true
  solar_flare:
    url: "https://api.nasa.gov/DONKI/FLR"
    requires_key: true
  space_weather:
    url: "https://api.nasa.gov/DONKI/notifications"
    requires_key: true
  geomagnetic:
    url: "https://services.swpc.noaa.gov/text/3-day-forecast.txt"
    requires_key: false
  neo:
    url: "https://api.nasa.gov/neo/rest/v1/feed"
    requires_key: true
  photo_journal:
    url: "https://photojournal.jpl.nasa.gov/rss/new"
    requires_key: false
    enabled: true
"#
}
