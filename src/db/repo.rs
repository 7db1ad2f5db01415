use super::model::{KindCount, LockRecord, RunRecord, StoreStatus};
use crate::error::StoreError;
use crate::model::ContentKind;
use crate::store::{LockAttempt, NewEntry, StoredEntry};
use crate::upsert::{FIELD_LOCAL_MEDIA, MEDIA_PENDING};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

type Result<T> = std::result::Result<T, StoreError>;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    if let Some(parent) = sqlite_file_path(database_url)
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Invalid(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    Ok(SqlitePool::connect_with(options).await?)
}

/// Single-connection in-memory pool, used by tests and dry runs.
pub async fn memory_pool() -> Result<Pool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Path of a file-backed SQLite URL; `None` for in-memory or non-SQLite URLs.
pub fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite:")?;
    if rest.starts_with(":memory:") {
        return None;
    }
    let path = rest
        .trim_start_matches("//")
        .split('?')
        .next()
        .unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn entry_from_row(row: &SqliteRow) -> Result<StoredEntry> {
    let kind: String = row.try_get("kind")?;
    let kind = ContentKind::parse_kind(&kind)
        .ok_or_else(|| StoreError::Invalid(format!("unknown content kind {kind}")))?;
    let entry_date = row
        .try_get::<Option<String>, _>("entry_date")?
        .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok());
    Ok(StoredEntry {
        id: row.try_get("id")?,
        kind,
        natural_key: row.try_get("natural_key")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        entry_date,
    })
}

#[instrument(skip_all)]
pub async fn find_entry_id(pool: &Pool, kind: ContentKind, natural_key: &str) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM entries WHERE kind = ? AND natural_key = ? ORDER BY id ASC LIMIT 1",
    )
    .bind(kind.as_str())
    .bind(natural_key)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn insert_entry(pool: &Pool, entry: &NewEntry) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO entries (kind, natural_key, title, body, entry_date, revision) \
         VALUES (?, ?, ?, ?, ?, (SELECT COALESCE(MAX(revision), 0) + 1 FROM entries)) RETURNING id",
    )
    .bind(entry.kind.as_str())
    .bind(&entry.natural_key)
    .bind(&entry.title)
    .bind(&entry.body)
    .bind(date_text(entry.entry_date))
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn update_entry(pool: &Pool, id: i64, entry: &NewEntry) -> Result<()> {
    let res = sqlx::query(
        "UPDATE entries SET title = ?, body = ?, entry_date = COALESCE(?, entry_date), \
         updated_at = CURRENT_TIMESTAMP, revision = (SELECT COALESCE(MAX(revision), 0) + 1 FROM entries) \
         WHERE id = ?",
    )
    .bind(&entry.title)
    .bind(&entry.body)
    .bind(date_text(entry.entry_date))
    .bind(id)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(StoreError::Invalid(format!("entry {id} not found")));
    }
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_field(pool: &Pool, entry_id: i64, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO entry_fields (entry_id, key, value) VALUES (?, ?, ?) \
         ON CONFLICT(entry_id, key) DO UPDATE SET value = excluded.value",
    )
    .bind(entry_id)
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_field(pool: &Pool, entry_id: i64, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>(
        "SELECT value FROM entry_fields WHERE entry_id = ? AND key = ?",
    )
    .bind(entry_id)
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(value)
}

pub async fn fetch_entry(pool: &Pool, id: i64) -> Result<Option<StoredEntry>> {
    let row = sqlx::query(
        "SELECT id, kind, natural_key, title, body, entry_date FROM entries WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(entry_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn latest_body(pool: &Pool, kind: ContentKind) -> Result<Option<String>> {
    let body = sqlx::query_scalar::<_, String>(
        "SELECT body FROM entries WHERE kind = ? ORDER BY revision DESC, id DESC LIMIT 1",
    )
    .bind(kind.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(body)
}

#[instrument(skip_all)]
pub async fn entries_with_field(
    pool: &Pool,
    kind: ContentKind,
    key: &str,
    value: &str,
) -> Result<Vec<StoredEntry>> {
    let rows = sqlx::query(
        "SELECT e.id, e.kind, e.natural_key, e.title, e.body, e.entry_date \
         FROM entries e JOIN entry_fields f ON f.entry_id = e.id \
         WHERE e.kind = ? AND f.key = ? AND f.value = ? \
         ORDER BY e.id ASC",
    )
    .bind(kind.as_str())
    .bind(key)
    .bind(value)
    .fetch_all(pool)
    .await?;
    rows.iter().map(entry_from_row).collect()
}

#[instrument(skip_all)]
pub async fn remove_duplicates(pool: &Pool) -> Result<u64> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "DELETE FROM entry_fields WHERE entry_id IN ( \
            SELECT id FROM entries WHERE id NOT IN ( \
                SELECT MIN(id) FROM entries GROUP BY kind, natural_key))",
    )
    .execute(&mut *tx)
    .await?;
    let removed = sqlx::query(
        "DELETE FROM entries WHERE id NOT IN (SELECT MIN(id) FROM entries GROUP BY kind, natural_key)",
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;
    Ok(removed)
}

#[instrument(skip_all)]
pub async fn optimize(pool: &Pool) -> Result<()> {
    sqlx::query("PRAGMA optimize;").execute(pool).await?;
    sqlx::query("VACUUM;").execute(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn cache_get_fresh(pool: &Pool, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<u8>>> {
    let body = sqlx::query_scalar::<_, Vec<u8>>(
        "SELECT body FROM response_cache WHERE cache_key = ? AND expires_at > ?",
    )
    .bind(key)
    .bind(now.timestamp())
    .fetch_optional(pool)
    .await?;
    Ok(body)
}

#[instrument(skip_all)]
pub async fn cache_put(pool: &Pool, key: &str, body: &[u8], expires_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "INSERT INTO response_cache (cache_key, body, expires_at) VALUES (?, ?, ?) \
         ON CONFLICT(cache_key) DO UPDATE SET body = excluded.body, expires_at = excluded.expires_at",
    )
    .bind(key)
    .bind(body)
    .bind(expires_at.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn cache_clear(pool: &Pool) -> Result<u64> {
    let res = sqlx::query("DELETE FROM response_cache").execute(pool).await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn try_acquire_lock(
    pool: &Pool,
    name: &str,
    holder: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<LockAttempt> {
    let mut tx = pool.begin().await?;
    let taken = sqlx::query(
        "INSERT INTO sync_locks (name, holder, expires_at) VALUES (?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at \
         WHERE sync_locks.expires_at <= ?",
    )
    .bind(name)
    .bind(holder)
    .bind(expires_at.timestamp())
    .bind(now.timestamp())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let attempt = if taken > 0 {
        LockAttempt::Acquired
    } else {
        let current: String = sqlx::query_scalar("SELECT holder FROM sync_locks WHERE name = ?")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        LockAttempt::HeldBy(current)
    };
    tx.commit().await?;
    Ok(attempt)
}

#[instrument(skip_all)]
pub async fn release_lock(pool: &Pool, name: &str, holder: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM sync_locks WHERE name = ? AND holder = ?")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn record_run(
    pool: &Pool,
    name: &str,
    finished_at: DateTime<Utc>,
    summary: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_runs (name, finished_at, summary) VALUES (?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET finished_at = excluded.finished_at, summary = excluded.summary",
    )
    .bind(name)
    .bind(finished_at.format("%Y-%m-%d %H:%M:%S").to_string())
    .bind(summary)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn status(pool: &Pool) -> Result<StoreStatus> {
    let kinds = sqlx::query("SELECT kind, COUNT(*) AS n FROM entries GROUP BY kind ORDER BY kind")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| KindCount {
            kind: row.get("kind"),
            entries: row.get("n"),
        })
        .collect();

    let pending_media: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM entry_fields WHERE key = ? AND value = ?",
    )
    .bind(FIELD_LOCAL_MEDIA)
    .bind(MEDIA_PENDING)
    .fetch_one(pool)
    .await?;

    let cached_responses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM response_cache")
        .fetch_one(pool)
        .await?;

    let runs = sqlx::query("SELECT name, finished_at, summary FROM sync_runs ORDER BY name")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| RunRecord {
            name: row.get("name"),
            finished_at: row.get("finished_at"),
            summary: row.get("summary"),
        })
        .collect();

    let locks = sqlx::query("SELECT name, holder, expires_at FROM sync_locks ORDER BY name")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| LockRecord {
            name: row.get("name"),
            holder: row.get("holder"),
            expires_at: row.get("expires_at"),
        })
        .collect();

    Ok(StoreStatus {
        kinds,
        pending_media,
        cached_responses,
        runs,
        locks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    async fn setup() -> Pool {
        let pool = memory_pool().await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn entry(kind: ContentKind, key: &str, body: &str) -> NewEntry {
        NewEntry {
            kind,
            natural_key: key.into(),
            title: key.to_uppercase(),
            body: body.into(),
            entry_date: NaiveDate::from_ymd_opt(2020, 1, 1),
        }
    }

    #[test]
    fn only_file_urls_have_a_path() {
        assert_eq!(sqlite_file_path("sqlite::memory:"), None);
        assert_eq!(sqlite_file_path("postgres://x"), None);
        assert_eq!(
            sqlite_file_path("sqlite://./data/skyfeed.db?mode=rwc"),
            Some(PathBuf::from("./data/skyfeed.db"))
        );
        assert_eq!(
            sqlite_file_path("sqlite:///var/lib/skyfeed.db"),
            Some(PathBuf::from("/var/lib/skyfeed.db"))
        );
    }

    #[tokio::test]
    async fn file_pool_creates_parent_dirs() {
        let td = tempfile::tempdir().unwrap();
        let db_path = td.path().join("nested/dir/skyfeed.db");
        let pool = init_pool(&format!("sqlite://{}", db_path.display())).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn insert_find_update_fetch() {
        let pool = setup().await;
        let id = insert_entry(&pool, &entry(ContentKind::Cme, "a1", "v1")).await.unwrap();
        assert_eq!(find_entry_id(&pool, ContentKind::Cme, "a1").await.unwrap(), Some(id));
        assert_eq!(find_entry_id(&pool, ContentKind::Neo, "a1").await.unwrap(), None);

        update_entry(&pool, id, &entry(ContentKind::Cme, "a1", "v2")).await.unwrap();
        let stored = fetch_entry(&pool, id).await.unwrap().unwrap();
        assert_eq!(stored.body, "v2");
        assert_eq!(stored.entry_date, NaiveDate::from_ymd_opt(2020, 1, 1));

        let err = update_entry(&pool, id + 100, &entry(ContentKind::Cme, "a1", "v3")).await;
        assert!(matches!(err, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn fields_upsert_and_filter() {
        let pool = setup().await;
        let a = insert_entry(&pool, &entry(ContentKind::Apod, "a", "x")).await.unwrap();
        let b = insert_entry(&pool, &entry(ContentKind::Apod, "b", "y")).await.unwrap();
        set_field(&pool, a, "local_media", "pending").await.unwrap();
        set_field(&pool, b, "local_media", "pending").await.unwrap();
        set_field(&pool, b, "local_media", "/data/b.jpg").await.unwrap();

        assert_eq!(get_field(&pool, b, "local_media").await.unwrap().as_deref(), Some("/data/b.jpg"));
        let pending = entries_with_field(&pool, ContentKind::Apod, "local_media", "pending")
            .await
            .unwrap();
        assert_eq!(pending.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a]);
        assert_eq!(status(&pool).await.unwrap().pending_media, 1);
    }

    #[tokio::test]
    async fn duplicates_keep_lowest_id() {
        let pool = setup().await;
        let first = insert_entry(&pool, &entry(ContentKind::Cme, "dup", "1")).await.unwrap();
        let second = insert_entry(&pool, &entry(ContentKind::Cme, "dup", "2")).await.unwrap();
        insert_entry(&pool, &entry(ContentKind::Neo, "dup", "3")).await.unwrap();
        set_field(&pool, second, "k", "v").await.unwrap();

        assert_eq!(latest_body(&pool, ContentKind::Cme).await.unwrap().as_deref(), Some("2"));
        assert_eq!(remove_duplicates(&pool).await.unwrap(), 1);
        assert_eq!(find_entry_id(&pool, ContentKind::Cme, "dup").await.unwrap(), Some(first));
        assert!(get_field(&pool, second, "k").await.unwrap().is_none());
        assert_eq!(remove_duplicates(&pool).await.unwrap(), 0);
        optimize(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn latest_body_follows_the_last_write() {
        let pool = setup().await;
        let a = insert_entry(&pool, &entry(ContentKind::Geomagnetic, "a", "Kp 3")).await.unwrap();
        insert_entry(&pool, &entry(ContentKind::Geomagnetic, "b", "Kp 5")).await.unwrap();
        assert_eq!(latest_body(&pool, ContentKind::Geomagnetic).await.unwrap().as_deref(), Some("Kp 5"));

        update_entry(&pool, a, &entry(ContentKind::Geomagnetic, "a", "Kp 3")).await.unwrap();
        assert_eq!(latest_body(&pool, ContentKind::Geomagnetic).await.unwrap().as_deref(), Some("Kp 3"));
    }

    #[tokio::test]
    async fn cache_honors_expiry() {
        let pool = setup().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        cache_put(&pool, "cme", b"[]", now + Duration::minutes(30)).await.unwrap();
        assert_eq!(cache_get_fresh(&pool, "cme", now).await.unwrap(), Some(b"[]".to_vec()));
        assert!(cache_get_fresh(&pool, "cme", now + Duration::hours(1)).await.unwrap().is_none());
        assert_eq!(cache_clear(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn locks_block_until_expired() {
        let pool = setup().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ttl = Duration::minutes(10);

        let first = try_acquire_lock(&pool, "historical", "a", now, now + ttl).await.unwrap();
        assert_eq!(first, LockAttempt::Acquired);
        let second = try_acquire_lock(&pool, "historical", "b", now, now + ttl).await.unwrap();
        assert_eq!(second, LockAttempt::HeldBy("a".into()));

        let later = now + Duration::minutes(11);
        let takeover = try_acquire_lock(&pool, "historical", "b", later, later + ttl).await.unwrap();
        assert_eq!(takeover, LockAttempt::Acquired);
        assert!(!release_lock(&pool, "historical", "a").await.unwrap());
        assert!(release_lock(&pool, "historical", "b").await.unwrap());
    }

    #[tokio::test]
    async fn runs_are_recorded_once_per_name() {
        let pool = setup().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        record_run(&pool, "cme", now, "inserted=1").await.unwrap();
        record_run(&pool, "cme", now, "inserted=2").await.unwrap();
        let st = status(&pool).await.unwrap();
        assert_eq!(st.runs.len(), 1);
        assert_eq!(st.runs[0].summary, "inserted=2");
        assert_eq!(st.runs[0].finished_at, "2024-05-01 12:00:00");
    }
}
