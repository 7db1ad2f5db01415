//! Photo-journal RSS feed.
use chrono::DateTime;

use crate::archive::clean_text;
use crate::error::FetchError;
use crate::model::{AlertRecord, ContentKind};
use crate::nasa::model::{Rss, RssItem};

pub fn parse_rss(xml: &str) -> Result<Vec<RssItem>, FetchError> {
    let rss: Rss = quick_xml::de::from_str(xml)?;
    Ok(rss.channel.items)
}

/// Key is the item guid, else its link.
pub fn journal_records(items: &[RssItem]) -> Vec<AlertRecord> {
    items
        .iter()
        .map(|item| {
            let link = item.link.as_deref().map(str::trim).unwrap_or_default();
            let natural_key = item
                .guid
                .as_ref()
                .map(|g| g.value.trim())
                .filter(|g| !g.is_empty())
                .unwrap_or(link)
                .to_string();
            let date = item
                .pub_date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
                .map(|d| d.date_naive());
            let mut fields = Vec::new();
            if !link.is_empty() {
                fields.push(("link".to_string(), link.to_string()));
            }
            AlertRecord {
                kind: ContentKind::PhotoJournal,
                natural_key,
                title: item.title.as_deref().map(clean_text).unwrap_or_default(),
                body: item.description.as_deref().map(clean_text).unwrap_or_default(),
                date,
                fields,
            }
        })
        .collect()
}
