mod common;

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use common::*;
use skyfeed_sync::cleanup::run_cleanup;
use skyfeed_sync::imagery::ImageryBackfill;
use skyfeed_sync::model::{ContentKind, MediaType, NormalizedRecord, UpsertOutcome};
use skyfeed_sync::store::{ContentStore, NewEntry};
use skyfeed_sync::upsert::{UpsertEngine, FIELD_LOCAL_MEDIA, MEDIA_NONE, MEDIA_PENDING};

fn entry(key: &str, body: &str) -> NewEntry {
    NewEntry {
        kind: ContentKind::Cme,
        natural_key: key.into(),
        title: format!("CME {key}"),
        body: body.into(),
        entry_date: None,
    }
}

fn photo(day: u32, title: &str, url: &str, media_type: MediaType) -> NormalizedRecord {
    NormalizedRecord {
        date: NaiveDate::from_ymd_opt(2020, 1, day).unwrap(),
        title: title.into(),
        explanation: "Explanation.".into(),
        media_url: url.into(),
        hd_media_url: None,
        media_type,
        copyright: None,
    }
}

#[tokio::test]
async fn cleanup_keeps_the_oldest_duplicate() {
    let store = setup_store().await;
    let first = store.insert(&entry("cme-1", "a")).await.unwrap();
    let dup = store.insert(&entry("cme-1", "b")).await.unwrap();
    let other = store.insert(&entry("cme-2", "c")).await.unwrap();
    store.set_field(dup, "note", "late copy").await.unwrap();

    let report = run_cleanup(store.as_ref()).await;

    assert_eq!(report.removed, Some(1));
    assert!(report.optimized);
    assert!(store.fetch(first).await.unwrap().is_some());
    assert!(store.fetch(dup).await.unwrap().is_none());
    assert!(store.fetch(other).await.unwrap().is_some());
    assert_eq!(store.get_field(dup, "note").await.unwrap(), None);

    let again = run_cleanup(store.as_ref()).await;
    assert_eq!(again.removed, Some(0));
}

#[tokio::test]
async fn imagery_downloads_pending_images_only() {
    let store = setup_store().await;
    let clock = clock();
    let engine = UpsertEngine::new(store.as_ref());
    let image = photo(1, "Betelgeuse Imagined", "https://apod.example.test/image/b.png", MediaType::Image);
    let video = photo(2, "Flight Over Mars", "https://www.youtube.com/embed/x", MediaType::Video);
    let broken = photo(3, "Lost Image", "https://apod.example.test/image/lost.jpg", MediaType::Image);
    for rec in [&image, &video, &broken] {
        assert_eq!(engine.upsert_photo(rec).await, UpsertOutcome::Inserted);
    }

    let fetcher = StubFetcher::new().route("image/b.png", 200, b"\x89PNG".to_vec());
    let td = tempdir().unwrap();
    let imagery = ImageryBackfill::new(
        Arc::new(fetcher.clone()),
        clock.clone(),
        store.clone(),
        td.path(),
        Duration::from_millis(100),
    );

    let report = imagery.run().await.unwrap();

    assert_eq!(report.downloaded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(fetcher.requests().len(), 2);
    assert_eq!(clock.sleeps().len(), 2);

    let path = td.path().join("apod").join("betelgeuse-imagined.png");
    assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG".to_vec());

    let id = store
        .find_by_key(ContentKind::Apod, "betelgeuse-imagined")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        store.get_field(id, FIELD_LOCAL_MEDIA).await.unwrap(),
        Some(path.to_string_lossy().into_owned())
    );
    let video_id = store
        .find_by_key(ContentKind::Apod, "flight-over-mars")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        store.get_field(video_id, FIELD_LOCAL_MEDIA).await.unwrap().as_deref(),
        Some(MEDIA_NONE)
    );

    let still_pending = store
        .entries_with_field(ContentKind::Apod, FIELD_LOCAL_MEDIA, MEDIA_PENDING)
        .await
        .unwrap();
    assert_eq!(still_pending.len(), 1);
    assert_eq!(still_pending[0].natural_key, "lost-image");
}

#[tokio::test]
async fn imagery_with_nothing_pending_makes_no_requests() {
    let store = setup_store().await;
    let clock = clock();
    let fetcher = StubFetcher::new();
    let td = tempdir().unwrap();
    let imagery = ImageryBackfill::new(
        Arc::new(fetcher.clone()),
        clock.clone(),
        store.clone(),
        td.path(),
        Duration::from_millis(100),
    );

    let report = imagery.run().await.unwrap();

    assert_eq!((report.downloaded, report.failed), (0, 0));
    assert!(fetcher.requests().is_empty());
    assert!(!td.path().join("apod").exists());
}
