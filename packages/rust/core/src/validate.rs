//! Tag validator: the single authority on whether a persisted tag record is valid.
//!
//! Every check runs independently and every violation is reported. An empty
//! result means the record is valid.

use std::fmt;

use podtagger_shared::{Category, EPISODE_NUMBER_KEY, EpisodeStore, TagRecord, Taxonomy};
use serde_json::Value;
use tracing::{info, instrument};

/// One structural problem with a tag record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A required key is absent.
    MissingKey(&'static str),
    /// A category value is not an array.
    NotAList(Category),
    /// Entries not permitted by the taxonomy (non-string entries included).
    UnknownTags { category: Category, tags: Vec<String> },
    /// A category array has no entries.
    EmptyCategory(Category),
    /// `episode_number` is neither an integer nor null.
    InvalidEpisodeNumber(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(key) => write!(f, "missing field {key}"),
            Self::NotAList(category) => write!(f, "{category} must be a list"),
            Self::UnknownTags { category, tags } => {
                write!(f, "invalid {category} tags: {}", tags.join(", "))
            }
            Self::EmptyCategory(category) => write!(f, "{category} cannot be empty"),
            Self::InvalidEpisodeNumber(value) => {
                write!(f, "episode_number must be an integer or null (got {value})")
            }
        }
    }
}

/// Check a tag record against the taxonomy and the structural rules.
pub fn validate(record: &TagRecord, taxonomy: &Taxonomy) -> Vec<Violation> {
    let mut violations = Vec::new();

    for category in Category::ALL {
        if record.category(category).is_none() {
            violations.push(Violation::MissingKey(category.key()));
        }
    }
    if !record.has_episode_number() {
        violations.push(Violation::MissingKey(EPISODE_NUMBER_KEY));
    }

    for category in Category::ALL {
        match record.category(category) {
            None => {}
            Some(Value::Array(entries)) => {
                let unknown: Vec<String> = entries
                    .iter()
                    .filter(|v| !is_permitted(v, category, taxonomy))
                    .map(display_entry)
                    .collect();
                if !unknown.is_empty() {
                    violations.push(Violation::UnknownTags {
                        category,
                        tags: unknown,
                    });
                }
                if entries.is_empty() {
                    violations.push(Violation::EmptyCategory(category));
                }
            }
            Some(_) => violations.push(Violation::NotAList(category)),
        }
    }

    if let Some(number) = record.episode_number() {
        if !number.is_null() && !is_integer(number) {
            violations.push(Violation::InvalidEpisodeNumber(number.to_string()));
        }
    }

    violations
}

/// Whether `value` is a string permitted in `category`.
pub(crate) fn is_permitted(value: &Value, category: Category, taxonomy: &Taxonomy) -> bool {
    value
        .as_str()
        .is_some_and(|tag| taxonomy.contains(category, tag))
}

pub(crate) fn is_integer(value: &Value) -> bool {
    value.as_i64().is_some()
}

/// Strings as-is, anything else as JSON text.
pub(crate) fn display_entry(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Store-level report
// ---------------------------------------------------------------------------

/// Violations of one episode.
#[derive(Debug, Clone)]
pub struct EpisodeViolations {
    pub guid: String,
    pub title: String,
    pub violations: Vec<Violation>,
}

impl fmt::Display for EpisodeViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        write!(f, "{}: {}", self.title, details.join("; "))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: usize,
    pub invalid: Vec<EpisodeViolations>,
    /// Episodes without tags (not checked).
    pub untagged: usize,
}

/// Validate every tagged episode. Read-only.
#[instrument(skip_all, fields(episodes = store.len()))]
pub fn validate_store(store: &EpisodeStore, taxonomy: &Taxonomy) -> ValidationReport {
    let mut report = ValidationReport::default();

    for episode in store.episodes.values() {
        let Some(tags) = &episode.tags else {
            report.untagged += 1;
            continue;
        };

        let violations = validate(tags, taxonomy);
        if violations.is_empty() {
            report.valid += 1;
        } else {
            report.invalid.push(EpisodeViolations {
                guid: episode.guid.clone(),
                title: episode.short_title(),
                violations,
            });
        }
    }

    info!(
        valid = report.valid,
        invalid = report.invalid.len(),
        untagged = report.untagged,
        "validation complete"
    );
    report
}
