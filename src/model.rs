use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Content type of a stored entry. Each kind carries its own natural-key policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Apod,
    Cme,
    SolarFlare,
    SpaceWeather,
    Geomagnetic,
    Neo,
    PhotoJournal,
}

impl ContentKind {
    pub const ALL: [ContentKind; 7] = [
        ContentKind::Apod,
        ContentKind::Cme,
        ContentKind::SolarFlare,
        ContentKind::SpaceWeather,
        ContentKind::Geomagnetic,
        ContentKind::Neo,
        ContentKind::PhotoJournal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Apod => "apod",
            ContentKind::Cme => "cme",
            ContentKind::SolarFlare => "solar_flare",
            ContentKind::SpaceWeather => "space_weather",
            ContentKind::Geomagnetic => "geomagnetic",
            ContentKind::Neo => "neo",
            ContentKind::PhotoJournal => "photo_journal",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        ContentKind::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// What to do when the natural key is already stored.
    pub fn key_policy(&self) -> KeyPolicy {
        match self {
            ContentKind::Apod => KeyPolicy::RefreshAsInserted,
            ContentKind::Cme | ContentKind::Neo => KeyPolicy::RefreshIfChanged,
            ContentKind::SolarFlare | ContentKind::SpaceWeather | ContentKind::PhotoJournal => {
                KeyPolicy::SkipExisting
            }
            ContentKind::Geomagnetic => KeyPolicy::LatestWins,
        }
    }
}

/// Per-family behavior on natural-key collision. The families deliberately
/// diverge; see DESIGN.md before unifying them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// Update mutable fields in place and report the record as inserted.
    RefreshAsInserted,
    /// Update in place when the payload changed, otherwise skip.
    RefreshIfChanged,
    /// A stored key is always a no-op.
    SkipExisting,
    /// Compare against the latest stored body of the kind; write only on change.
    LatestWins,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }

    /// Anything the upstream does not call a video is treated as an image.
    pub fn parse_media_type(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("video") {
            MediaType::Video
        } else {
            MediaType::Image
        }
    }
}

/// Feed-agnostic daily-photo record, produced by both the API decoder and the
/// archive scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub date: NaiveDate,
    pub title: String,
    pub explanation: String,
    pub media_url: String,
    pub hd_media_url: Option<String>,
    pub media_type: MediaType,
    pub copyright: Option<String>,
}

impl NormalizedRecord {
    pub fn natural_key(&self) -> String {
        slugify(&self.title)
    }
}

/// Normalized alert-family record with its family-specific natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRecord {
    pub kind: ContentKind,
    pub natural_key: String,
    pub title: String,
    pub body: String,
    pub date: Option<NaiveDate>,
    /// Companion attributes written after a successful upsert.
    pub fields: Vec<(String, String)>,
}

/// Case- and whitespace-insensitive slug used as the daily-photo natural key.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Inclusive date range handed to the backfill engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub api_keys: Vec<String>,
}

/// Classification of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Skipped,
    Failed,
}

/// Running tally of a sync, emitted once at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTally {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Scraped days that yielded no record. Neither success nor failure.
    pub dropped: usize,
    /// Chunks whose API request failed and fell through to the scraper.
    pub failed_chunks: usize,
    pub requests_made: u64,
}

impl SyncTally {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
            UpsertOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped + self.failed
    }

    pub fn summary_line(&self) -> String {
        format!(
            "inserted={} updated={} skipped={} failed={} dropped={} failed_chunks={} requests={}",
            self.inserted,
            self.updated,
            self.skipped,
            self.failed,
            self.dropped,
            self.failed_chunks,
            self.requests_made
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_ignores_case_and_whitespace() {
        assert_eq!(slugify("  The Horsehead   Nebula "), "the-horsehead-nebula");
        assert_eq!(slugify("the horsehead nebula"), "the-horsehead-nebula");
        assert_eq!(slugify("M31: Andromeda!"), "m31-andromeda");
        assert_eq!(slugify("   "), "");
    }

    #[test]
    fn kinds_round_trip_through_strings() {
        for kind in ContentKind::ALL {
            assert_eq!(ContentKind::parse_kind(kind.as_str()), Some(kind));
        }
        assert_eq!(ContentKind::parse_kind("nope"), None);
    }

    #[test]
    fn tally_records_each_outcome() {
        let mut tally = SyncTally::default();
        tally.record(UpsertOutcome::Inserted);
        tally.record(UpsertOutcome::Inserted);
        tally.record(UpsertOutcome::Skipped);
        tally.record(UpsertOutcome::Failed);
        assert_eq!((tally.inserted, tally.skipped, tally.failed), (2, 1, 1));
        assert_eq!(tally.total(), 4);
    }

    #[test]
    fn unknown_media_types_are_images() {
        assert_eq!(MediaType::parse_media_type("video"), MediaType::Video);
        assert_eq!(MediaType::parse_media_type("other"), MediaType::Image);
    }
}
