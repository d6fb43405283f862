//! Repair engine: deterministic corrections for malformed tag records.
//!
//! Per tagged episode, in order:
//! 1. backfill missing keys (`episode_number` → null, category → `[]`)
//! 2. coerce a non-list category (string → one-element list, else `[]`)
//! 3. drop entries the taxonomy does not permit
//! 4. coerce `episode_number` (numeric string → integer, other non-integer → null)
//! 5. re-validate; if anything is still wrong, reset `tags` and `tagged_at`
//!    so the episode goes back to the tagging pool
//!
//! A second pass over a repaired store changes nothing.

use std::fmt;

use podtagger_shared::{Category, EPISODE_NUMBER_KEY, EpisodeStore, TagRecord, Taxonomy};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::validate::{Violation, display_entry, is_integer, is_permitted, validate};

/// One correction applied to an episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fix {
    AddedEpisodeNumber,
    AddedCategory(Category),
    WrappedScalar(Category),
    ReplacedNonList(Category),
    RemovedUnknown { category: Category, removed: Vec<String> },
    ParsedEpisodeNumber(i64),
    ResetEpisodeNumber,
    /// The record was unsalvageable and was removed.
    ResetTags(Vec<Violation>),
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddedEpisodeNumber => f.write_str("added episode_number"),
            Self::AddedCategory(c) => write!(f, "added empty {c}"),
            Self::WrappedScalar(c) => write!(f, "converted {c} to list"),
            Self::ReplacedNonList(c) => write!(f, "replaced non-list {c} with empty list"),
            Self::RemovedUnknown { category, removed } => {
                write!(f, "removed invalid {category} tags ({})", removed.join(", "))
            }
            Self::ParsedEpisodeNumber(n) => write!(f, "converted episode_number to {n}"),
            Self::ResetEpisodeNumber => f.write_str("reset invalid episode_number"),
            Self::ResetTags(violations) => {
                let reasons: Vec<String> = violations.iter().map(ToString::to_string).collect();
                write!(f, "RESET TAGS, still invalid after fixes: {}", reasons.join("; "))
            }
        }
    }
}

/// Corrections applied to one episode.
#[derive(Debug, Clone)]
pub struct EpisodeRepair {
    pub guid: String,
    pub title: String,
    pub fixes: Vec<Fix>,
}

impl EpisodeRepair {
    pub fn was_reset(&self) -> bool {
        self.fixes.iter().any(|f| matches!(f, Fix::ResetTags(_)))
    }
}

impl fmt::Display for EpisodeRepair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fixes: Vec<String> = self.fixes.iter().map(ToString::to_string).collect();
        write!(f, "{}: {}", self.title, fixes.join(", "))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepairReport {
    /// Tagged episodes inspected.
    pub examined: usize,
    /// Episodes that received at least one fix.
    pub repaired: Vec<EpisodeRepair>,
}

impl RepairReport {
    /// Episodes whose tags were removed.
    pub fn reset_count(&self) -> usize {
        self.repaired.iter().filter(|r| r.was_reset()).count()
    }
}

/// Repair every tagged episode in place.
#[instrument(skip_all, fields(episodes = store.len()))]
pub fn repair_store(store: &mut EpisodeStore, taxonomy: &Taxonomy) -> RepairReport {
    let mut report = RepairReport::default();

    for episode in store.episodes.values_mut() {
        let Some(tags) = episode.tags.as_mut() else {
            continue;
        };
        report.examined += 1;

        let mut fixes = repair_record(tags, taxonomy);
        let remaining = validate(tags, taxonomy);
        if !remaining.is_empty() {
            episode.tags = None;
            episode.tagged_at = None;
            fixes.push(Fix::ResetTags(remaining));
        }

        if !fixes.is_empty() {
            debug!(guid = %episode.guid, fixes = fixes.len(), "episode repaired");
            report.repaired.push(EpisodeRepair {
                guid: episode.guid.clone(),
                title: episode.short_title(),
                fixes,
            });
        }
    }

    info!(
        examined = report.examined,
        repaired = report.repaired.len(),
        reset = report.reset_count(),
        "repair complete"
    );
    report
}

/// Steps 1-4 on one record. Returns the fixes applied.
pub fn repair_record(record: &mut TagRecord, taxonomy: &Taxonomy) -> Vec<Fix> {
    let mut fixes = Vec::new();
    let map = &mut record.0;

    if !map.contains_key(EPISODE_NUMBER_KEY) {
        map.insert(EPISODE_NUMBER_KEY.into(), Value::Null);
        fixes.push(Fix::AddedEpisodeNumber);
    }
    for category in Category::ALL {
        if !map.contains_key(category.key()) {
            map.insert(category.key().into(), Value::Array(Vec::new()));
            fixes.push(Fix::AddedCategory(category));
        }
    }

    for category in Category::ALL {
        let Some(value) = map.get_mut(category.key()) else {
            continue;
        };

        let coerced = match value {
            Value::Array(_) => None,
            Value::String(s) => Some((
                Value::Array(vec![Value::String(std::mem::take(s))]),
                Fix::WrappedScalar(category),
            )),
            _ => Some((Value::Array(Vec::new()), Fix::ReplacedNonList(category))),
        };
        if let Some((list, fix)) = coerced {
            *value = list;
            fixes.push(fix);
        }

        if let Value::Array(entries) = value {
            let mut removed = Vec::new();
            entries.retain(|entry| {
                let keep = is_permitted(entry, category, taxonomy);
                if !keep {
                    removed.push(display_entry(entry));
                }
                keep
            });
            if !removed.is_empty() {
                fixes.push(Fix::RemovedUnknown { category, removed });
            }
        }
    }

    if let Some(number) = map.get_mut(EPISODE_NUMBER_KEY) {
        if !number.is_null() && !is_integer(number) {
            match number.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
                Some(parsed) => {
                    *number = Value::from(parsed);
                    fixes.push(Fix::ParsedEpisodeNumber(parsed));
                }
                None => {
                    *number = Value::Null;
                    fixes.push(Fix::ResetEpisodeNumber);
                }
            }
        }
    }

    fixes
}
