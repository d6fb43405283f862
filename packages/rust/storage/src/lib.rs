//! Persisted state for podtagger: the episode store and the taxonomy.
//!
//! Both are plain JSON documents. Every save is a full snapshot written to a
//! sibling temp file and renamed over the target, so readers only ever see a
//! complete document.
//!
//! **Access rules:**
//! - The pipeline coordinator is the sole writer of the state file.
//! - A present-but-malformed document is fatal; an absent one is empty/default.

use std::path::{Path, PathBuf};

use podtagger_shared::{EpisodeStore, PodtaggerError, Result, Taxonomy};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Episode store
// ---------------------------------------------------------------------------

/// Handle to the persisted episode store document.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store. Missing file yields an empty store.
    pub fn load(&self) -> Result<EpisodeStore> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "state file not found, starting empty");
            return Ok(EpisodeStore::default());
        }

        let store: EpisodeStore = read_json(&self.path)?;
        debug!(path = %self.path.display(), episodes = store.len(), "state loaded");
        Ok(store)
    }

    /// Overwrite the document with a full snapshot of `store`.
    pub fn save(&self, store: &EpisodeStore) -> Result<()> {
        write_json_atomic(&self.path, store)?;
        debug!(path = %self.path.display(), episodes = store.len(), "state saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

/// Load the taxonomy at `path`, or the built-in default when it does not exist.
///
/// A file that exists but cannot be decoded, or that leaves a category
/// without any tags, is a configuration error.
pub fn load_taxonomy(path: &Path) -> Result<Taxonomy> {
    if !path.exists() {
        debug!(path = %path.display(), "taxonomy file not found, using built-in default");
        return Ok(Taxonomy::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| PodtaggerError::io(path, e))?;
    let taxonomy: Taxonomy = serde_json::from_str(&content).map_err(|e| {
        PodtaggerError::config(format!("invalid taxonomy file {}: {e}", path.display()))
    })?;

    let empty = taxonomy.empty_categories();
    if !empty.is_empty() {
        let names: Vec<&str> = empty.iter().map(|c| c.key()).collect();
        return Err(PodtaggerError::config(format!(
            "invalid taxonomy file {}: no tags for {}",
            path.display(),
            names.join(", ")
        )));
    }

    info!(
        path = %path.display(),
        format = taxonomy.format.len(),
        theme = taxonomy.theme.len(),
        track = taxonomy.track.len(),
        "taxonomy loaded"
    );
    Ok(taxonomy)
}

/// Persist a taxonomy (pretty-printed, atomic).
pub fn save_taxonomy(path: &Path, taxonomy: &Taxonomy) -> Result<()> {
    write_json_atomic(path, taxonomy)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| PodtaggerError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        PodtaggerError::Storage(format!("corrupt document {}: {e}", path.display()))
    })
}

/// Write JSON to `.<name>.tmp` next to `path`, then rename over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| PodtaggerError::Storage(format!("JSON serialization failed: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PodtaggerError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| PodtaggerError::Storage(format!("not a file path: {}", path.display())))?;
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, json).map_err(|e| PodtaggerError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| PodtaggerError::io(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
