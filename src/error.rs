//! Error types shared by the sync engine and its collaborators.
use chrono::NaiveDate;
use thiserror::Error;

/// Network-level failure (connect, timeout, body read). Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError(err.to_string())
    }
}

/// Failure of one API request as seen by the backfill engine.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error("upstream returned HTTP {status}")]
    Upstream { status: u16 },
    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid XML payload: {0}")]
    Xml(#[from] quick_xml::DeError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("invalid store input: {0}")]
    Invalid(String),
}

/// Errors that abort a whole run (or a whole feed sync).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("a sync is already in progress (held by {holder})")]
    Locked { holder: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
