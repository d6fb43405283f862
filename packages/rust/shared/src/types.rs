//! Core domain types: episodes, the episode store document, and tag payloads.
//!
//! Timestamps are written as RFC 3339. Timestamps without an offset, as
//! found in older state documents, are read as UTC.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::taxonomy::Category;

/// JSON key of the episode number inside a tag payload.
pub const EPISODE_NUMBER_KEY: &str = "episode_number";

// ---------------------------------------------------------------------------
// Episode
// ---------------------------------------------------------------------------

/// One feed entry tracked through enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Identity key, immutable once ingested.
    pub guid: String,
    pub title: String,
    /// Raw description as published (may contain markup).
    pub description: String,
    /// Publish date as published by the feed (usually RFC 2822).
    pub published_date: String,
    #[serde(default)]
    pub audio_url: Option<String>,
    /// Set by the cleaning stage.
    #[serde(default)]
    pub cleaned_description: Option<String>,
    /// Set by the tagging stage; reset by repair when unsalvageable.
    #[serde(default)]
    pub tags: Option<TagRecord>,
    #[serde(deserialize_with = "timestamp::required")]
    pub ingested_at: DateTime<Utc>,
    #[serde(
        default,
        deserialize_with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub cleaned_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub tagged_at: Option<DateTime<Utc>>,
}

impl Episode {
    /// A freshly ingested episode with every enrichment field absent.
    pub fn new(
        guid: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        published_date: impl Into<String>,
        audio_url: Option<String>,
        ingested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            guid: guid.into(),
            title: title.into(),
            description: description.into(),
            published_date: published_date.into(),
            audio_url,
            cleaned_description: None,
            tags: None,
            ingested_at,
            cleaned_at: None,
            tagged_at: None,
        }
    }

    /// Title truncated for operator-facing output.
    pub fn short_title(&self) -> String {
        self.title.chars().take(60).collect()
    }

    /// Eligible for the cleaning stage.
    pub fn needs_cleaning(&self) -> bool {
        self.cleaned_description.is_none()
    }

    /// Eligible for the tagging stage.
    pub fn needs_tagging(&self) -> bool {
        self.tags.is_none() && self.cleaned_description.is_some()
    }
}

// ---------------------------------------------------------------------------
// EpisodeStore
// ---------------------------------------------------------------------------

/// The persisted state document: `{ "episodes": { guid: Episode } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStore {
    #[serde(default)]
    pub episodes: BTreeMap<String, Episode>,
}

impl EpisodeStore {
    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn get(&self, guid: &str) -> Option<&Episode> {
        self.episodes.get(guid)
    }

    pub fn get_mut(&mut self, guid: &str) -> Option<&mut Episode> {
        self.episodes.get_mut(guid)
    }

    pub fn contains(&self, guid: &str) -> bool {
        self.episodes.contains_key(guid)
    }

    /// Guids of every episode matching `pred`, in key order.
    pub fn select(&self, pred: impl Fn(&Episode) -> bool) -> Vec<String> {
        self.episodes
            .values()
            .filter(|ep| pred(ep))
            .map(|ep| ep.guid.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TagAssignment (strict)
// ---------------------------------------------------------------------------

/// Typed output of the tagging stage.
///
/// Model replies are decoded into this type or rejected. All four keys are
/// required; `episode_number` may be `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagAssignment {
    #[serde(rename = "Format")]
    pub format: Vec<String>,
    #[serde(rename = "Theme")]
    pub theme: Vec<String>,
    #[serde(rename = "Track")]
    pub track: Vec<String>,
    #[serde(deserialize_with = "required_nullable")]
    pub episode_number: Option<i64>,
}

/// Makes a missing `episode_number` a decode error instead of `None`.
fn required_nullable<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer)
}

impl TagAssignment {
    /// Tags of one category.
    pub fn category(&self, category: Category) -> &[String] {
        match category {
            Category::Format => &self.format,
            Category::Theme => &self.theme,
            Category::Track => &self.track,
        }
    }
}

/// Lenient timestamp decoding for the persisted episode fields.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub(super) fn required<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(D::Error::custom)
    }

    pub(super) fn optional<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| parse(&raw).map_err(D::Error::custom))
            .transpose()
    }

    fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| raw.parse::<NaiveDateTime>().map(|naive| naive.and_utc()))
            .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
    }
}

// ---------------------------------------------------------------------------
// TagRecord (persisted view)
// ---------------------------------------------------------------------------

/// The `tags` object as it sits in the state document.
///
/// Persisted documents can come from older versions or manual edits, so the
/// record is kept as a JSON object. The validator and the repair engine are
/// the only readers of its raw shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagRecord(pub Map<String, Value>);

impl TagRecord {
    /// Value stored under a category key.
    pub fn category(&self, category: Category) -> Option<&Value> {
        self.0.get(category.key())
    }

    /// Whether `episode_number` is present (possibly `null`).
    pub fn has_episode_number(&self) -> bool {
        self.0.contains_key(EPISODE_NUMBER_KEY)
    }

    pub fn episode_number(&self) -> Option<&Value> {
        self.0.get(EPISODE_NUMBER_KEY)
    }

    /// Strict decode. `None` when the record does not have the typed shape.
    pub fn to_assignment(&self) -> Option<TagAssignment> {
        serde_json::from_value(Value::Object(self.0.clone())).ok()
    }
}

impl From<TagAssignment> for TagRecord {
    fn from(assignment: TagAssignment) -> Self {
        let mut map = Map::new();
        map.insert(
            Category::Format.key().into(),
            Value::from(assignment.format),
        );
        map.insert(Category::Theme.key().into(), Value::from(assignment.theme));
        map.insert(Category::Track.key().into(), Value::from(assignment.track));
        map.insert(
            EPISODE_NUMBER_KEY.into(),
            assignment.episode_number.map(Value::from).unwrap_or(Value::Null),
        );
        Self(map)
    }
}
