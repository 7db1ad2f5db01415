//! Normalization of the alert-family payloads into `AlertRecord`s.
use chrono::NaiveDate;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::nasa::model::{leading_date, CmeEvent, NeoFeed, NeoObject, Notification, SolarFlare};
use crate::model::{AlertRecord, ContentKind};

pub fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn push_field(fields: &mut Vec<(String, String)>, key: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        fields.push((key.to_string(), v.to_string()));
    }
}

/// Items that do not decode keep an empty key and fail at upsert time.
fn decode_item<T: serde::de::DeserializeOwned>(item: &Value) -> Option<T> {
    serde_json::from_value(item.clone()).ok()
}

pub fn cme_records(items: &[Value]) -> Vec<AlertRecord> {
    items
        .iter()
        .map(|item| {
            let event: Option<CmeEvent> = decode_item(item);
            let id = event
                .as_ref()
                .and_then(|e| e.activity_id.clone())
                .unwrap_or_default();
            let mut fields = Vec::new();
            if let Some(e) = &event {
                push_field(&mut fields, "start_time", e.start_time.as_deref());
                push_field(&mut fields, "source_location", e.source_location.as_deref());
                push_field(&mut fields, "note", e.note.as_deref());
            }
            AlertRecord {
                kind: ContentKind::Cme,
                title: format!("CME {id}"),
                natural_key: id,
                body: item.to_string(),
                date: event
                    .as_ref()
                    .and_then(|e| e.start_time.as_deref())
                    .and_then(leading_date),
                fields,
            }
        })
        .collect()
}

pub fn flare_records(items: &[Value]) -> Vec<AlertRecord> {
    items
        .iter()
        .map(|item| {
            let flare: Option<SolarFlare> = decode_item(item);
            let id = flare.as_ref().and_then(|f| f.flr_id.clone()).unwrap_or_default();
            let class = flare
                .as_ref()
                .and_then(|f| f.class_type.clone())
                .unwrap_or_else(|| "?".into());
            let mut fields = Vec::new();
            if let Some(f) = &flare {
                push_field(&mut fields, "class_type", f.class_type.as_deref());
                push_field(&mut fields, "begin_time", f.begin_time.as_deref());
                push_field(&mut fields, "peak_time", f.peak_time.as_deref());
                push_field(&mut fields, "source_location", f.source_location.as_deref());
            }
            AlertRecord {
                kind: ContentKind::SolarFlare,
                title: format!("Solar flare {class} ({id})"),
                natural_key: id,
                body: item.to_string(),
                date: flare
                    .as_ref()
                    .and_then(|f| f.begin_time.as_deref())
                    .and_then(leading_date),
                fields,
            }
        })
        .collect()
}

/// Notifications carry no stable id of their own, so the key is the payload hash.
pub fn notification_records(items: &[Value]) -> Vec<AlertRecord> {
    items
        .iter()
        .map(|item| {
            let body = item.to_string();
            let note: Option<Notification> = decode_item(item);
            let mut fields = Vec::new();
            let mut title = "Space weather notification".to_string();
            let mut date = None;
            if let Some(n) = &note {
                push_field(&mut fields, "message_type", n.message_type.as_deref());
                push_field(&mut fields, "message_id", n.message_id.as_deref());
                push_field(&mut fields, "message_url", n.message_url.as_deref());
                if let (Some(kind), Some(id)) = (&n.message_type, &n.message_id) {
                    title = format!("{kind} {id}");
                }
                date = n.message_issue_time.as_deref().and_then(leading_date);
            }
            AlertRecord {
                kind: ContentKind::SpaceWeather,
                natural_key: content_hash(body.as_bytes()),
                title,
                body,
                date,
                fields,
            }
        })
        .collect()
}

/// The forecast text is stored verbatim; only a change in text is a new record.
pub fn geomagnetic_record(text: &str, today: NaiveDate) -> AlertRecord {
    AlertRecord {
        kind: ContentKind::Geomagnetic,
        natural_key: content_hash(text.as_bytes()),
        title: format!("Geomagnetic forecast {today}"),
        body: text.to_string(),
        date: Some(today),
        fields: Vec::new(),
    }
}

pub fn neo_records(feed: &NeoFeed) -> Vec<AlertRecord> {
    let mut records = Vec::new();
    for (day, objects) in &feed.near_earth_objects {
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok();
        for item in objects {
            let neo: Option<NeoObject> = decode_item(item);
            let (id, name, hazardous) = neo
                .map(|n| (n.id, n.name, n.is_potentially_hazardous_asteroid))
                .unwrap_or_default();
            records.push(AlertRecord {
                kind: ContentKind::Neo,
                natural_key: id,
                title: name.trim().to_string(),
                body: item.to_string(),
                date,
                fields: vec![
                    ("close_approach_date".to_string(), day.clone()),
                    ("hazardous".to_string(), hazardous.to_string()),
                ],
            });
        }
    }
    records
}
