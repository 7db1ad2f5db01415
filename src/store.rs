//! Persistence seams used by the sync engine.
//!
//! The engine only talks to these traits; `db::SqliteStore` implements all of
//! them on a single SQLite pool.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::model::ContentKind;

/// Values written to an entry on insert or in-place update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub kind: ContentKind,
    pub natural_key: String,
    pub title: String,
    pub body: String,
    pub entry_date: Option<NaiveDate>,
}

/// A stored entry as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub id: i64,
    pub kind: ContentKind,
    pub natural_key: String,
    pub title: String,
    pub body: String,
    pub entry_date: Option<NaiveDate>,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Lowest id stored under `(kind, natural_key)`.
    async fn find_by_key(&self, kind: ContentKind, natural_key: &str)
        -> Result<Option<i64>, StoreError>;

    async fn insert(&self, entry: &NewEntry) -> Result<i64, StoreError>;

    async fn update(&self, id: i64, entry: &NewEntry) -> Result<(), StoreError>;

    async fn set_field(&self, id: i64, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get_field(&self, id: i64, key: &str) -> Result<Option<String>, StoreError>;

    async fn fetch(&self, id: i64) -> Result<Option<StoredEntry>, StoreError>;

    /// Body of the most recently written (inserted or updated) entry of `kind`.
    async fn latest_body(&self, kind: ContentKind) -> Result<Option<String>, StoreError>;

    /// Entries of `kind` whose companion field `key` currently equals `value`.
    async fn entries_with_field(
        &self,
        kind: ContentKind,
        key: &str,
        value: &str,
    ) -> Result<Vec<StoredEntry>, StoreError>;

    /// Keep the lowest id per `(kind, natural_key)`; returns how many were removed.
    async fn remove_duplicates(&self) -> Result<u64, StoreError>;

    async fn optimize(&self) -> Result<(), StoreError>;
}

/// Short-lived response cache for the recurring feeds.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get_fresh(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, body: &[u8], expires_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Drop every cached response; returns how many were removed.
    async fn clear(&self) -> Result<u64, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    HeldBy(String),
}

/// Advisory locks and the last-run ledger.
#[async_trait]
pub trait SyncLedger: Send + Sync {
    /// Take `name` unless an unexpired lock exists. Expired locks are taken over.
    async fn try_acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<LockAttempt, StoreError>;

    /// Remove `name` if still held by `holder`. Returns whether a row was removed.
    async fn release_lock(&self, name: &str, holder: &str) -> Result<bool, StoreError>;

    async fn record_run(
        &self,
        name: &str,
        finished_at: DateTime<Utc>,
        summary: &str,
    ) -> Result<(), StoreError>;
}
