//! SQLite persistence: read models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: read models returned by the status queries.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! [`SqliteStore`] wires the repository functions into the engine's storage
//! traits so callers only ever hold one handle.

pub mod model;
pub mod repo;

pub use model::StoreStatus;
pub use repo::{init_pool, memory_pool, run_migrations, sqlite_file_path, Pool};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::ContentKind;
use crate::store::{ContentStore, LockAttempt, NewEntry, ResponseCache, StoredEntry, SyncLedger};

/// Content store, response cache and sync ledger on one pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `database_url` and migrate it.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = init_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Fresh migrated in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = memory_pool().await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn status(&self) -> Result<StoreStatus, StoreError> {
        repo::status(&self.pool).await
    }
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn find_by_key(
        &self,
        kind: ContentKind,
        natural_key: &str,
    ) -> Result<Option<i64>, StoreError> {
        repo::find_entry_id(&self.pool, kind, natural_key).await
    }

    async fn insert(&self, entry: &NewEntry) -> Result<i64, StoreError> {
        repo::insert_entry(&self.pool, entry).await
    }

    async fn update(&self, id: i64, entry: &NewEntry) -> Result<(), StoreError> {
        repo::update_entry(&self.pool, id, entry).await
    }

    async fn set_field(&self, id: i64, key: &str, value: &str) -> Result<(), StoreError> {
        repo::set_field(&self.pool, id, key, value).await
    }

    async fn get_field(&self, id: i64, key: &str) -> Result<Option<String>, StoreError> {
        repo::get_field(&self.pool, id, key).await
    }

    async fn fetch(&self, id: i64) -> Result<Option<StoredEntry>, StoreError> {
        repo::fetch_entry(&self.pool, id).await
    }

    async fn latest_body(&self, kind: ContentKind) -> Result<Option<String>, StoreError> {
        repo::latest_body(&self.pool, kind).await
    }

    async fn entries_with_field(
        &self,
        kind: ContentKind,
        key: &str,
        value: &str,
    ) -> Result<Vec<StoredEntry>, StoreError> {
        repo::entries_with_field(&self.pool, kind, key, value).await
    }

    async fn remove_duplicates(&self) -> Result<u64, StoreError> {
        repo::remove_duplicates(&self.pool).await
    }

    async fn optimize(&self) -> Result<(), StoreError> {
        repo::optimize(&self.pool).await
    }
}

#[async_trait]
impl ResponseCache for SqliteStore {
    async fn get_fresh(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        repo::cache_get_fresh(&self.pool, key, now).await
    }

    async fn put(
        &self,
        key: &str,
        body: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        repo::cache_put(&self.pool, key, body, expires_at).await
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        repo::cache_clear(&self.pool).await
    }
}

#[async_trait]
impl SyncLedger for SqliteStore {
    async fn try_acquire_lock(
        &self,
        name: &str,
        holder: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<LockAttempt, StoreError> {
        repo::try_acquire_lock(&self.pool, name, holder, now, expires_at).await
    }

    async fn release_lock(&self, name: &str, holder: &str) -> Result<bool, StoreError> {
        repo::release_lock(&self.pool, name, holder).await
    }

    async fn record_run(
        &self,
        name: &str,
        finished_at: DateTime<Utc>,
        summary: &str,
    ) -> Result<(), StoreError> {
        repo::record_run(&self.pool, name, finished_at, summary).await
    }
}
