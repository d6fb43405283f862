//! Batch enrichment executor.
//!
//! The eligible guids are split into consecutive batches of `width`. Each
//! batch runs one task per episode; results come back to this coordinator in
//! completion order and are applied to the store here, never from inside a
//! task. The whole store is persisted after every batch, so an interrupted
//! run loses at most the batch in flight.
//!
//! A failed, panicked or timed-out task only fails its own episode. Nothing
//! is retried: failed episodes simply stay eligible for the next run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use podtagger_shared::{Episode, EpisodeStore, PodtaggerError, Result};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Default number of episodes enriched concurrently per batch.
pub const DEFAULT_WIDTH: usize = 10;

// ---------------------------------------------------------------------------
// Stage contract
// ---------------------------------------------------------------------------

/// One enrichment step applied per episode.
///
/// `prepare` and `apply` run on the coordinator with access to the store;
/// `enrich` runs in a spawned task and only sees the detached input.
pub trait EnrichmentStage: Send + Sync + 'static {
    /// Owned snapshot of what the task needs from the episode.
    type Input: Send + 'static;
    /// Result handed back to the coordinator.
    type Output: Send + 'static;

    /// Stage name used in logs and progress output.
    const NAME: &'static str;

    fn prepare(&self, episode: &Episode) -> Self::Input;

    fn enrich(
        self: Arc<Self>,
        input: Self::Input,
    ) -> impl Future<Output = Result<Self::Output>> + Send + 'static;

    fn apply(&self, episode: &mut Episode, output: Self::Output, now: DateTime<Utc>);

    /// Operator-facing remark on a successful output (e.g. a fallback was used).
    fn note(&self, _output: &Self::Output) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// Config, progress, report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Tasks per batch (clamped to at least 1).
    pub width: usize,
    /// Upper bound on a single task; exceeding it fails that episode.
    pub task_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            task_timeout: None,
        }
    }
}

/// Progress callback for batch runs.
pub trait BatchProgress: Send + Sync {
    /// Called once before the first batch.
    fn started(&self, stage: &str, total: usize);
    /// An episode's result was applied.
    fn succeeded(&self, title: &str, note: Option<&str>);
    /// An episode failed and stays eligible.
    fn failed(&self, title: &str, error: &str);
    /// A batch was persisted; `done` episodes of `total` have been processed.
    fn batch_saved(&self, done: usize, total: usize);
}

/// No-op progress for headless/test usage.
pub struct SilentProgress;

impl BatchProgress for SilentProgress {
    fn started(&self, _stage: &str, _total: usize) {}
    fn succeeded(&self, _title: &str, _note: Option<&str>) {}
    fn failed(&self, _title: &str, _error: &str) {}
    fn batch_saved(&self, _done: usize, _total: usize) {}
}

/// Summary of one executor run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// `(guid, error message)` for every failed episode.
    pub failed: Vec<(String, String)>,
    /// Batches completed and persisted.
    pub batches: usize,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Enrich `eligible` episodes in batches, persisting after each batch.
///
/// Only a persistence failure aborts the run; per-episode failures are
/// collected in the report.
#[instrument(skip_all, fields(stage = S::NAME, eligible = eligible.len(), width = config.width))]
pub async fn run_batches<S, P>(
    store: &mut EpisodeStore,
    eligible: &[String],
    stage: Arc<S>,
    config: &ExecutorConfig,
    mut persist: P,
    progress: &dyn BatchProgress,
) -> Result<BatchReport>
where
    S: EnrichmentStage,
    P: FnMut(&EpisodeStore) -> Result<()>,
{
    let width = config.width.max(1);
    let mut report = BatchReport::default();

    progress.started(S::NAME, eligible.len());
    info!("starting batch run");

    for batch in eligible.chunks(width) {
        let mut tasks = JoinSet::new();

        for guid in batch {
            let Some(episode) = store.get(guid) else {
                warn!(%guid, "eligible episode missing from store, skipping");
                continue;
            };
            let input = stage.prepare(episode);
            let task = Arc::clone(&stage).enrich(input);
            let guid = guid.clone();
            let limit = config.task_timeout;

            tasks.spawn(async move { (guid, run_task(task, limit).await) });
            report.attempted += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            let (guid, outcome) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "batch task lost");
                    report.failed.push(("<unknown>".into(), e.to_string()));
                    continue;
                }
            };
            let Some(episode) = store.get_mut(&guid) else {
                continue;
            };
            let title = episode.short_title();

            match outcome {
                Ok(output) => {
                    let note = stage.note(&output);
                    stage.apply(episode, output, Utc::now());
                    debug!(%guid, "episode enriched");
                    progress.succeeded(&title, note.as_deref());
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(%guid, error = %e, "episode enrichment failed");
                    progress.failed(&title, &e.to_string());
                    report.failed.push((guid, e.to_string()));
                }
            }
        }

        if let Err(e) = persist(store) {
            error!(error = %e, "failed to persist batch, aborting run");
            return Err(e);
        }
        report.batches += 1;
        progress.batch_saved(report.succeeded + report.failed.len(), eligible.len());
    }

    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed.len(),
        batches = report.batches,
        "batch run complete"
    );
    Ok(report)
}

/// Run one enrichment future on its own task so a panic or timeout is
/// confined to that episode.
async fn run_task<F, T>(future: F, limit: Option<Duration>) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(future);
    let abort = handle.abort_handle();

    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(PodtaggerError::Network(format!(
                    "timed out after {:.1}s",
                    limit.as_secs_f64()
                )));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) => Err(PodtaggerError::Enrichment(format!("task failed: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
