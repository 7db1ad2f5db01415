//! Wire shapes of the upstream feeds.
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{MediaType, NormalizedRecord};

/// One daily-photo entry as returned by the API.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ApodEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub hdurl: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
}

impl ApodEntry {
    pub fn into_record(self) -> NormalizedRecord {
        NormalizedRecord {
            date: self.date,
            title: self.title.trim().to_string(),
            explanation: self.explanation.trim().to_string(),
            media_type: MediaType::parse_media_type(self.media_type.as_deref().unwrap_or("image")),
            media_url: self.url,
            hd_media_url: self.hdurl.filter(|u| !u.trim().is_empty()),
            copyright: self
                .copyright
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
        }
    }
}

/// Range queries answer with an array, the current-day query with one object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApodPayload {
    Many(Vec<ApodEntry>),
    One(ApodEntry),
}

impl ApodPayload {
    pub fn into_entries(self) -> Vec<ApodEntry> {
        match self {
            ApodPayload::Many(entries) => entries,
            ApodPayload::One(entry) => vec![entry],
        }
    }
}

/// Coronal mass ejection activity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmeEvent {
    #[serde(rename = "activityID")]
    pub activity_id: Option<String>,
    pub start_time: Option<String>,
    pub source_location: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolarFlare {
    #[serde(rename = "flrID")]
    pub flr_id: Option<String>,
    pub begin_time: Option<String>,
    pub peak_time: Option<String>,
    pub class_type: Option<String>,
    pub source_location: Option<String>,
}

/// Space-weather notification message.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "messageID")]
    pub message_id: Option<String>,
    pub message_type: Option<String>,
    pub message_issue_time: Option<String>,
    #[serde(rename = "messageURL")]
    pub message_url: Option<String>,
}

/// Near-earth-object feed, keyed by date.
#[derive(Debug, Clone, Deserialize)]
pub struct NeoFeed {
    pub near_earth_objects: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NeoObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_potentially_hazardous_asteroid: bool,
}

/// Minimal RSS 2.0 document for the photo-journal feed.
#[derive(Debug, Deserialize)]
pub struct Rss {
    pub channel: Channel,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    #[serde(rename = "item", default)]
    pub items: Vec<RssItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RssItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub pub_date: Option<String>,
    pub description: Option<String>,
}

/// `<guid isPermaLink="...">value</guid>`
#[derive(Debug, Clone, Deserialize)]
pub struct Guid {
    #[serde(rename = "$text", default)]
    pub value: String,
}

/// Extract the leading `YYYY-MM-DD` of an upstream timestamp.
pub fn leading_date(ts: &str) -> Option<NaiveDate> {
    ts.get(..10)
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
}
