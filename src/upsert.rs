//! Natural-key upserts with per-family collision policies.
//!
//! Store errors never escape: they classify the record as
//! [`UpsertOutcome::Failed`] so a run keeps going.
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::{AlertRecord, ContentKind, KeyPolicy, MediaType, NormalizedRecord, UpsertOutcome};
use crate::store::{ContentStore, NewEntry};

pub const FIELD_MEDIA_TYPE: &str = "media_type";
pub const FIELD_MEDIA_URL: &str = "media_url";
pub const FIELD_HD_MEDIA_URL: &str = "hd_media_url";
pub const FIELD_COPYRIGHT: &str = "copyright";
pub const FIELD_APOD_DATE: &str = "apod_date";
pub const FIELD_LOCAL_MEDIA: &str = "local_media";

/// `local_media` placeholder for an image not yet downloaded.
pub const MEDIA_PENDING: &str = "pending";
/// `local_media` value for media that is never downloaded (videos).
pub const MEDIA_NONE: &str = "none";

/// Where an entry ended up after the key lookup.
struct Resolution {
    id: i64,
    outcome: UpsertOutcome,
    created: bool,
    written: bool,
}

pub struct UpsertEngine<'a> {
    store: &'a dyn ContentStore,
}

impl<'a> UpsertEngine<'a> {
    pub fn new(store: &'a dyn ContentStore) -> Self {
        Self { store }
    }

    /// Upsert one daily-photo record. A stored key is refreshed in place and
    /// still reported as `Inserted`.
    pub async fn upsert_photo(&self, rec: &NormalizedRecord) -> UpsertOutcome {
        let natural_key = rec.natural_key();
        if rec.title.trim().is_empty() || natural_key.is_empty() {
            warn!(date = %rec.date, "daily photo without a title; not stored");
            return UpsertOutcome::Failed;
        }
        let entry = NewEntry {
            kind: ContentKind::Apod,
            natural_key,
            title: rec.title.clone(),
            body: rec.explanation.clone(),
            entry_date: Some(rec.date),
        };

        let previous_url = match self.stored_media_url(&entry.natural_key).await {
            Ok(url) => url,
            Err(err) => {
                warn!(key = %entry.natural_key, %err, "lookup failed");
                return UpsertOutcome::Failed;
            }
        };

        let res = match self.resolve(&entry, KeyPolicy::RefreshAsInserted).await {
            Ok(Some(res)) => res,
            Ok(None) => return UpsertOutcome::Skipped,
            Err(err) => {
                warn!(key = %entry.natural_key, %err, "daily photo upsert failed");
                return UpsertOutcome::Failed;
            }
        };

        let media_changed = res.created || previous_url.as_deref() != Some(rec.media_url.as_str());
        if let Err(err) = self.write_photo_fields(res.id, rec, media_changed).await {
            warn!(id = res.id, %err, "failed to write companion fields");
            return UpsertOutcome::Failed;
        }
        debug!(id = res.id, key = %entry.natural_key, outcome = ?res.outcome, "daily photo upserted");
        res.outcome
    }

    /// Upsert one alert-family record under its kind's key policy.
    pub async fn upsert_alert(&self, rec: &AlertRecord) -> UpsertOutcome {
        if rec.natural_key.trim().is_empty() || rec.title.trim().is_empty() {
            warn!(kind = rec.kind.as_str(), "alert without a natural key or title; not stored");
            return UpsertOutcome::Failed;
        }
        let entry = NewEntry {
            kind: rec.kind,
            natural_key: rec.natural_key.clone(),
            title: rec.title.clone(),
            body: rec.body.clone(),
            entry_date: rec.date,
        };

        let res = match self.resolve(&entry, rec.kind.key_policy()).await {
            Ok(Some(res)) => res,
            Ok(None) => return UpsertOutcome::Skipped,
            Err(err) => {
                warn!(kind = rec.kind.as_str(), key = %rec.natural_key, %err, "alert upsert failed");
                return UpsertOutcome::Failed;
            }
        };

        if res.written {
            for (key, value) in &rec.fields {
                if let Err(err) = self.store.set_field(res.id, key, value).await {
                    warn!(id = res.id, field = %key, %err, "failed to write companion field");
                    return UpsertOutcome::Failed;
                }
            }
        }
        res.outcome
    }

    /// Apply `policy` to `entry`. `Ok(None)` means skipped before any key lookup.
    async fn resolve(
        &self,
        entry: &NewEntry,
        policy: KeyPolicy,
    ) -> Result<Option<Resolution>, StoreError> {
        if policy == KeyPolicy::LatestWins {
            let latest = self.store.latest_body(entry.kind).await?;
            if latest.as_deref() == Some(entry.body.as_str()) {
                return Ok(None);
            }
        }

        let Some(id) = self.store.find_by_key(entry.kind, &entry.natural_key).await? else {
            let id = self.store.insert(entry).await?;
            return Ok(Some(Resolution {
                id,
                outcome: UpsertOutcome::Inserted,
                created: true,
                written: true,
            }));
        };

        let res = match policy {
            KeyPolicy::RefreshAsInserted => {
                self.store.update(id, entry).await?;
                Resolution {
                    id,
                    outcome: UpsertOutcome::Inserted,
                    created: false,
                    written: true,
                }
            }
            KeyPolicy::RefreshIfChanged => {
                let stored = self.store.fetch(id).await?;
                let changed = stored.map_or(true, |s| s.body != entry.body || s.title != entry.title);
                if changed {
                    self.store.update(id, entry).await?;
                }
                Resolution {
                    id,
                    outcome: if changed { UpsertOutcome::Updated } else { UpsertOutcome::Skipped },
                    created: false,
                    written: changed,
                }
            }
            KeyPolicy::SkipExisting => Resolution {
                id,
                outcome: UpsertOutcome::Skipped,
                created: false,
                written: false,
            },
            // Text seen before but no longer the latest: rewrite it so it becomes the latest again.
            KeyPolicy::LatestWins => {
                self.store.update(id, entry).await?;
                Resolution {
                    id,
                    outcome: UpsertOutcome::Updated,
                    created: false,
                    written: true,
                }
            }
        };
        Ok(Some(res))
    }

    async fn stored_media_url(&self, natural_key: &str) -> Result<Option<String>, StoreError> {
        match self.store.find_by_key(ContentKind::Apod, natural_key).await? {
            Some(id) => self.store.get_field(id, FIELD_MEDIA_URL).await,
            None => Ok(None),
        }
    }

    async fn write_photo_fields(
        &self,
        id: i64,
        rec: &NormalizedRecord,
        media_changed: bool,
    ) -> Result<(), StoreError> {
        let date = rec.date.format("%Y-%m-%d").to_string();
        let mut fields: Vec<(&str, &str)> = vec![
            (FIELD_MEDIA_TYPE, rec.media_type.as_str()),
            (FIELD_MEDIA_URL, rec.media_url.as_str()),
            (FIELD_APOD_DATE, date.as_str()),
        ];
        if let Some(hd) = rec.hd_media_url.as_deref() {
            fields.push((FIELD_HD_MEDIA_URL, hd));
        }
        if let Some(copyright) = rec.copyright.as_deref() {
            fields.push((FIELD_COPYRIGHT, copyright));
        }
        // Leave an already-downloaded copy alone unless the source moved.
        if media_changed {
            let placeholder = match rec.media_type {
                MediaType::Image => MEDIA_PENDING,
                MediaType::Video => MEDIA_NONE,
            };
            fields.push((FIELD_LOCAL_MEDIA, placeholder));
        }

        for (key, value) in fields {
            self.store.set_field(id, key, value).await?;
        }
        Ok(())
    }
}
