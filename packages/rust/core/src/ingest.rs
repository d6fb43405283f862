//! Ingestion merger: fold the entries currently published by the feed into
//! the episode store.
//!
//! New guids are inserted with every enrichment field absent. Known guids are
//! never touched, not even to refresh a stale title or description, so the
//! merge is idempotent and cannot lose enrichment work.

use chrono::{DateTime, Utc};
use podtagger_feed::FeedEntry;
use podtagger_shared::{Episode, EpisodeStore};
use tracing::{debug, info, instrument};

/// Outcome of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Episodes created by this merge.
    pub inserted: usize,
    /// Entries whose guid was already in the store (left untouched).
    pub already_present: usize,
    /// Entries without a usable guid.
    pub skipped_invalid: usize,
    /// Episodes in the store after the merge.
    pub total: usize,
}

/// Insert every feed entry whose guid is not yet in `store`.
#[instrument(skip_all, fields(entries = entries.len()))]
pub fn merge_feed(store: &mut EpisodeStore, entries: &[FeedEntry], now: DateTime<Utc>) -> MergeReport {
    let mut report = MergeReport::default();

    for entry in entries {
        let Some(guid) = entry.guid.as_deref().map(str::trim).filter(|g| !g.is_empty()) else {
            debug!(title = %entry.title, "skipping entry without guid");
            report.skipped_invalid += 1;
            continue;
        };

        if store.contains(guid) {
            report.already_present += 1;
            continue;
        }

        let episode = Episode::new(
            guid,
            entry.title.clone(),
            entry.description.clone(),
            entry.published_date.clone(),
            entry.enclosure_url.clone(),
            now,
        );
        store.episodes.insert(guid.to_string(), episode);
        report.inserted += 1;
    }

    report.total = store.len();
    info!(
        inserted = report.inserted,
        already_present = report.already_present,
        skipped = report.skipped_invalid,
        total = report.total,
        "feed merged"
    );
    report
}
