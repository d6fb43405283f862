//! Exporter: a read-only, point-in-time snapshot of tagged episodes.
//!
//! Records are ordered newest first. Each invocation writes one new
//! `export_YYYYMMDD_HHMMSS.json` artifact and never overwrites an existing one.

use std::cmp::Ordering;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use podtagger_shared::{EpisodeStore, PodtaggerError, Result, TagRecord};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

/// Flattened external view of one tagged episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub guid: String,
    pub title: String,
    pub published_date: String,
    pub audio_url: Option<String>,
    pub tags: TagRecord,
    pub cleaned_description: Option<String>,
}

/// Where an export landed.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub path: PathBuf,
    pub count: usize,
    /// Hex SHA-256 of the written file.
    pub sha256: String,
}

/// Every tagged episode, newest first.
///
/// Undated or unparseable dates sort after all dated records; ties are
/// broken by guid so the order is deterministic.
pub fn collect_export(store: &EpisodeStore) -> Vec<ExportRecord> {
    let mut keyed: Vec<(Option<DateTime<Utc>>, ExportRecord)> = store
        .episodes
        .values()
        .filter_map(|ep| {
            let tags = ep.tags.clone()?;
            Some((
                parse_published(&ep.published_date),
                ExportRecord {
                    guid: ep.guid.clone(),
                    title: ep.title.clone(),
                    published_date: ep.published_date.clone(),
                    audio_url: ep.audio_url.clone(),
                    tags,
                    cleaned_description: ep.cleaned_description.clone(),
                },
            ))
        })
        .collect();

    keyed.sort_by(|(da, a), (db, b)| {
        let by_date = match (da, db) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_date.then_with(|| a.guid.cmp(&b.guid))
    });

    keyed.into_iter().map(|(_, record)| record).collect()
}

/// Feed dates are RFC 2822; RFC 3339 and plain `YYYY-MM-DD` are accepted too.
///
/// A day name that disagrees with the date is ignored.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|e| match raw.split_once(", ") {
            Some((day, rest)) if day.chars().all(|c| c.is_ascii_alphabetic()) => {
                DateTime::parse_from_rfc2822(rest.trim_start())
            }
            _ => Err(e),
        })
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}

/// Write `records` to a new timestamped file in `dir`.
#[instrument(skip_all, fields(dir = %dir.display(), records = records.len()))]
pub fn write_export(dir: &Path, records: &[ExportRecord], now: DateTime<Utc>) -> Result<ExportResult> {
    std::fs::create_dir_all(dir).map_err(|e| PodtaggerError::io(dir, e))?;

    let path = dir.join(format!("export_{}.json", now.format("%Y%m%d_%H%M%S")));
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| PodtaggerError::Storage(format!("JSON serialization failed: {e}")))?;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                PodtaggerError::validation(format!(
                    "export {} already exists, refusing to overwrite",
                    path.display()
                ))
            } else {
                PodtaggerError::io(&path, e)
            }
        })?;
    write_or_discard(file, &path, json.as_bytes())?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let sha256 = format!("{:x}", hasher.finalize());

    info!(path = %path.display(), count = records.len(), "export written");
    Ok(ExportResult {
        path,
        count: records.len(),
        sha256,
    })
}

/// Write `bytes` to the freshly created `path`; a failed write removes the
/// partial file so the same name can be retried.
fn write_or_discard<W: Write>(mut out: W, path: &Path, bytes: &[u8]) -> Result<()> {
    let written = out.write_all(bytes).and_then(|()| out.flush());
    drop(out);
    written.map_err(|e| {
        let _ = std::fs::remove_file(path);
        PodtaggerError::io(path, e)
    })
}
