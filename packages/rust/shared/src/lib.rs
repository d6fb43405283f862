//! Shared types, error model, and configuration for podtagger.
//!
//! This crate is the foundation depended on by all other podtagger crates.
//! It provides:
//! - [`PodtaggerError`] — the unified error type
//! - Domain types ([`Episode`], [`EpisodeStore`], [`TagAssignment`], [`TagRecord`])
//! - The tag vocabulary ([`Taxonomy`], [`Category`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod taxonomy;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FeedConfig, LlmConfig, PipelineConfig, TaggingConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
    resolve_feed_url,
};
pub use error::{PodtaggerError, Result};
pub use taxonomy::{Category, Taxonomy};
pub use types::{EPISODE_NUMBER_KEY, Episode, EpisodeStore, TagAssignment, TagRecord};
