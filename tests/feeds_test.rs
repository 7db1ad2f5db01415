mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use skyfeed_sync::clock::ManualClock;
use skyfeed_sync::config::{self, Config};
use skyfeed_sync::db::SqliteStore;
use skyfeed_sync::error::SyncError;
use skyfeed_sync::feeds::{Feed, FeedSettings, FeedSyncer};
use skyfeed_sync::http::HttpResponse;
use skyfeed_sync::model::ContentKind;
use skyfeed_sync::store::{ContentStore, ResponseCache};

const CACHE_TTL: Duration = Duration::from_secs(1800);

fn settings() -> FeedSettings {
    let cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    FeedSettings::from_config(&cfg)
}

fn syncer(
    fetcher: &StubFetcher,
    clock: &Arc<ManualClock>,
    store: &Arc<SqliteStore>,
    settings: FeedSettings,
) -> FeedSyncer {
    FeedSyncer::new(
        Arc::new(fetcher.clone()),
        clock.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        settings,
    )
}

fn cme(note: &str) -> String {
    json!([{
        "activityID": "2024-05-01T08:00:00-CME-001",
        "startTime": "2024-05-01T08:00Z",
        "note": note
    }])
    .to_string()
}

#[tokio::test]
async fn fresh_cache_entry_skips_the_network() {
    let store = setup_store().await;
    let clock = clock();
    let fetcher = StubFetcher::new().route("DONKI/CME", 200, cme("halo"));
    let syncer = syncer(&fetcher, &clock, &store, settings());

    let first = syncer.sync(Feed::Cme).await.unwrap();
    clock.advance(Duration::from_secs(60));
    let second = syncer.sync(Feed::Cme).await.unwrap();

    assert!(!first.cached);
    assert_eq!(first.tally.inserted, 1);
    assert!(second.cached);
    assert_eq!(second.tally.skipped, 1);
    assert_eq!(fetcher.requests().len(), 1);

    clock.advance(CACHE_TTL);
    let third = syncer.sync(Feed::Cme).await.unwrap();
    assert!(!third.cached);
    assert_eq!(fetcher.requests().len(), 2);
}

#[tokio::test]
async fn cache_keys_never_contain_the_api_key() {
    let store = setup_store().await;
    let clock = clock();
    let fetcher = StubFetcher::new().route("DONKI/CME", 200, "[]");
    let syncer = syncer(&fetcher, &clock, &store, settings());

    syncer.sync(Feed::Cme).await.unwrap();

    let keys: Vec<String> = sqlx::query_scalar("SELECT cache_key FROM response_cache")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("cme:"));
    assert!(!keys[0].contains("DEMO_KEY"));
    assert!(fetcher.requests()[0].as_str().contains("api_key=DEMO_KEY"));
}

#[tokio::test]
async fn changed_cme_payload_updates_in_place() {
    let store = setup_store().await;
    let clock = clock();
    let fetcher = StubFetcher::new().route_seq(
        "DONKI/CME",
        vec![
            Ok(HttpResponse::new(200, cme("halo"))),
            Ok(HttpResponse::new(200, cme("halo, earth-directed"))),
        ],
    );
    let syncer = syncer(&fetcher, &clock, &store, settings());

    syncer.sync(Feed::Cme).await.unwrap();
    store.clear().await.unwrap();
    let second = syncer.sync(Feed::Cme).await.unwrap();

    assert_eq!(second.tally.updated, 1);
    let id = store
        .find_by_key(ContentKind::Cme, "2024-05-01T08:00:00-CME-001")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        store.get_field(id, "note").await.unwrap().as_deref(),
        Some("halo, earth-directed")
    );
}

#[tokio::test]
async fn known_flares_are_skipped() {
    let store = setup_store().await;
    let clock = clock();
    let body = json!([{
        "flrID": "2024-05-01T01:00:00-FLR-001",
        "classType": "X1.1",
        "beginTime": "2024-05-01T01:00Z"
    }])
    .to_string();
    let fetcher = StubFetcher::new().route("DONKI/FLR", 200, body);
    let syncer = syncer(&fetcher, &clock, &store, settings());

    let first = syncer.sync(Feed::SolarFlare).await.unwrap();
    store.clear().await.unwrap();
    let second = syncer.sync(Feed::SolarFlare).await.unwrap();

    assert_eq!(first.tally.inserted, 1);
    assert_eq!(second.tally.skipped, 1);
    assert_eq!(second.tally.updated, 0);
}

#[tokio::test]
async fn geomagnetic_forecast_latest_text_wins() {
    let store = setup_store().await;
    let clock = clock();
    let fetcher = StubFetcher::new().route_seq(
        "3-day-forecast",
        vec![
            Ok(HttpResponse::new(200, "Kp 3 quiet")),
            Ok(HttpResponse::new(200, "Kp 3 quiet")),
            Ok(HttpResponse::new(200, "Kp 6 storm")),
            Ok(HttpResponse::new(200, "Kp 3 quiet")),
            Ok(HttpResponse::new(200, "Kp 3 quiet")),
        ],
    );
    let syncer = syncer(&fetcher, &clock, &store, settings());

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        let report = syncer.sync(Feed::Geomagnetic).await.unwrap();
        let t = report.tally;
        outcomes.push((t.inserted, t.updated, t.skipped));
        store.clear().await.unwrap();
    }

    assert_eq!(
        outcomes,
        vec![(1, 0, 0), (0, 0, 1), (1, 0, 0), (0, 1, 0), (0, 0, 1)]
    );
    assert_eq!(
        store.latest_body(ContentKind::Geomagnetic).await.unwrap().as_deref(),
        Some("Kp 3 quiet")
    );
    assert!(fetcher.requests()[0].query().is_none());
}

#[tokio::test]
async fn keyed_feed_without_keys_is_a_configuration_error() {
    let store = setup_store().await;
    let clock = clock();
    let fetcher = StubFetcher::new();
    let mut settings = settings();
    settings.api_keys.clear();
    let syncer = syncer(&fetcher, &clock, &store, settings);

    let err = syncer.sync(Feed::Neo).await.unwrap_err();

    assert!(matches!(err, SyncError::Configuration(_)));
    assert!(fetcher.requests().is_empty());
}

#[tokio::test]
async fn neo_queries_todays_window() {
    let store = setup_store().await;
    let clock = clock();
    let body = json!({
        "element_count": 1,
        "near_earth_objects": {
            "2024-05-01": [{"id": "3542519", "name": "(2010 PK9)", "is_potentially_hazardous_asteroid": false}]
        }
    })
    .to_string();
    let fetcher = StubFetcher::new().route("neo/rest", 200, body);
    let syncer = syncer(&fetcher, &clock, &store, settings());

    let report = syncer.sync(Feed::Neo).await.unwrap();

    assert_eq!(report.tally.inserted, 1);
    let url = fetcher.requests()[0].to_string();
    assert!(url.contains("start_date=2024-05-01"));
    assert!(url.contains("end_date=2024-05-01"));
}

#[tokio::test]
async fn sync_all_continues_past_a_failing_feed() {
    let store = setup_store().await;
    let clock = clock();
    let rss = r#"<rss version="2.0"><channel><title>Photojournal</title>
        <item><title>PIA1</title><link>https://photojournal.example.test/PIA1</link></item>
        </channel></rss>"#;
    let fetcher = StubFetcher::new()
        .route("planetary/apod", 200, apod_json("2024-05-01", "Spiral Galaxy").to_string())
        .route("DONKI/CME", 500, "boom")
        .route("DONKI/FLR", 200, "")
        .route("DONKI/notifications", 200, "[]")
        .route("3-day-forecast", 200, "Kp 2")
        .route("neo/rest", 200, r#"{"near_earth_objects": {}}"#)
        .route("photojournal", 200, rss);
    let syncer = syncer(&fetcher, &clock, &store, settings());

    let report = syncer.sync_all().await;

    assert_eq!(report.succeeded.len(), 6);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].feed, Feed::Cme);
    assert!(report.succeeded.iter().any(|r| r.feed == Feed::Apod && r.tally.inserted == 1));

    let status = store.status().await.unwrap();
    let ran: Vec<&str> = status.runs.iter().map(|r| r.name.as_str()).collect();
    assert!(ran.contains(&"geomagnetic"));
    assert!(!ran.contains(&"cme"));
}

#[tokio::test]
async fn disabled_feeds_are_left_out_of_sync_all() {
    let store = setup_store().await;
    let clock = clock();
    let fetcher = StubFetcher::new().route("3-day-forecast", 200, "Kp 2");
    let mut settings = settings();
    for feed in Feed::ALL {
        if feed != Feed::Geomagnetic {
            disable(&mut settings, feed);
        }
    }
    let syncer = syncer(&fetcher, &clock, &store, settings);

    let report = syncer.sync_all().await;

    assert_eq!(report.succeeded.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(fetcher.requests().len(), 1);
}

fn disable(settings: &mut FeedSettings, feed: Feed) {
    let f = &mut settings.feeds;
    let endpoint = match feed {
        Feed::Apod => &mut f.apod,
        Feed::Cme => &mut f.cme,
        Feed::SolarFlare => &mut f.solar_flare,
        Feed::SpaceWeather => &mut f.space_weather,
        Feed::Geomagnetic => &mut f.geomagnetic,
        Feed::Neo => &mut f.neo,
        Feed::PhotoJournal => &mut f.photo_journal,
    };
    endpoint.enabled = false;
}
