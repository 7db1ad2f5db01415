#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Url;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use skyfeed_sync::clock::ManualClock;
use skyfeed_sync::db::SqliteStore;
use skyfeed_sync::error::TransportError;
use skyfeed_sync::http::{HttpFetch, HttpResponse};
use skyfeed_sync::progress::{DayOutcome, ProgressReporter, SyncEvent};

pub const IMAGE_PAGE: &str = include_str!("../fixtures/ap200101.html");
pub const VIDEO_PAGE: &str = include_str!("../fixtures/ap200102_video.html");
pub const MALFORMED_PAGE: &str = include_str!("../fixtures/malformed.html");

pub async fn setup_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ))
}

type Reply = Result<HttpResponse, TransportError>;

/// Serves canned responses by URL substring. A route with several replies
/// plays them in order and repeats the last one.
#[derive(Clone, Default)]
pub struct StubFetcher {
    routes: Arc<Mutex<Vec<(String, VecDeque<Reply>)>>>,
    requests: Arc<Mutex<Vec<Url>>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, pattern: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.route_seq(pattern, vec![Ok(HttpResponse::new(status, body))])
    }

    pub fn route_seq(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), replies.into()));
        self
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_matching(&self, pattern: &str) -> Vec<Url> {
        self.requests()
            .into_iter()
            .filter(|u| u.as_str().contains(pattern))
            .collect()
    }
}

#[async_trait]
impl HttpFetch for StubFetcher {
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(url.clone());
        let mut routes = self.routes.lock().unwrap();
        let Some((_, replies)) = routes
            .iter_mut()
            .find(|(pattern, _)| url.as_str().contains(pattern.as_str()))
        else {
            return Ok(HttpResponse::new(404, "not found"));
        };
        if replies.len() > 1 {
            return replies.pop_front().unwrap();
        }
        replies
            .front()
            .cloned()
            .unwrap_or_else(|| Ok(HttpResponse::new(404, "not found")))
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn ticks(&self) -> Vec<DayOutcome> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::Tick { outcome, .. } => Some(outcome),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: &SyncEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn apod_json(date: &str, title: &str) -> serde_json::Value {
    serde_json::json!({
        "date": date,
        "title": title,
        "explanation": format!("About {title}."),
        "url": format!("https://apod.nasa.gov/apod/image/{date}.jpg"),
        "media_type": "image",
        "service_version": "v1"
    })
}
