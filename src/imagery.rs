//! Downloads daily-photo images still marked with the `pending` placeholder.
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::error::{StoreError, SyncError, TransportError};
use crate::http::HttpFetch;
use crate::model::ContentKind;
use crate::store::{ContentStore, StoredEntry};
use crate::upsert::{FIELD_LOCAL_MEDIA, FIELD_MEDIA_URL, MEDIA_PENDING};

const DEFAULT_EXTENSION: &str = "jpg";

/// Why one image was not stored. Counted and logged, never fatal to a run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no media_url recorded")]
    MissingUrl,
    #[error("media_url is not an absolute URL: {0}")]
    BadUrl(String),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageryReport {
    pub downloaded: usize,
    pub failed: usize,
}

pub struct ImageryBackfill {
    fetcher: Arc<dyn HttpFetch>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ContentStore>,
    media_dir: PathBuf,
    delay: Duration,
}

impl ImageryBackfill {
    pub fn new(
        fetcher: Arc<dyn HttpFetch>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ContentStore>,
        media_dir: impl Into<PathBuf>,
        delay: Duration,
    ) -> Self {
        Self {
            fetcher,
            clock,
            store,
            media_dir: media_dir.into(),
            delay,
        }
    }

    fn target_dir(&self) -> PathBuf {
        self.media_dir.join(ContentKind::Apod.as_str())
    }

    /// Download every pending image. Per-entry failures are logged and counted.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<ImageryReport, SyncError> {
        let pending = self
            .store
            .entries_with_field(ContentKind::Apod, FIELD_LOCAL_MEDIA, MEDIA_PENDING)
            .await?;
        let mut report = ImageryReport::default();
        if pending.is_empty() {
            info!("no pending imagery");
            return Ok(report);
        }

        let dir = self.target_dir();
        tokio::fs::create_dir_all(&dir).await?;
        info!(count = pending.len(), dir = %dir.display(), "downloading pending imagery");

        for entry in &pending {
            match self.download(entry, &dir).await {
                Ok(path) => {
                    report.downloaded += 1;
                    info!(id = entry.id, path = %path.display(), "image stored");
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(id = entry.id, key = %entry.natural_key, %err, "image download failed");
                }
            }
            self.clock.sleep(self.delay).await;
        }
        Ok(report)
    }

    async fn download(&self, entry: &StoredEntry, dir: &Path) -> Result<PathBuf, DownloadError> {
        let raw = self
            .store
            .get_field(entry.id, FIELD_MEDIA_URL)
            .await?
            .ok_or(DownloadError::MissingUrl)?;
        let url = Url::parse(&raw).map_err(|_| DownloadError::BadUrl(raw.clone()))?;

        let res = self.fetcher.get(&url).await?;
        if !res.is_ok() {
            return Err(DownloadError::Status(res.status));
        }

        let path = dir.join(format!("{}.{}", entry.natural_key, media_extension(&url)));
        tokio::fs::write(&path, &res.body).await?;
        self.store
            .set_field(entry.id, FIELD_LOCAL_MEDIA, &path.to_string_lossy())
            .await?;
        Ok(path)
    }
}

/// Lower-cased file extension of the URL path, `jpg` when there is no usable one.
pub fn media_extension(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
