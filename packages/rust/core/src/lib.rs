//! Core pipeline and domain logic for podtagger.
//!
//! Ingestion merges the feed into the episode store; the batch executor
//! drives the cleaning and tagging stages; the validator and repair engine
//! keep persisted tags conformant to the taxonomy; the exporter publishes
//! a snapshot. [`pipeline::Pipeline`] ties each of them to the persisted state.

pub mod clean;
pub mod executor;
pub mod export;
pub mod ingest;
pub mod pipeline;
pub mod repair;
pub mod tag;
pub mod taxonomy_gen;
pub mod validate;

pub use executor::{BatchProgress, BatchReport, SilentProgress};
pub use pipeline::Pipeline;
