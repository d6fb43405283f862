//! Command-level orchestration: each operation loads the persisted state,
//! runs one stage over it and persists the result.
//!
//! Every operation is idempotent and can be invoked independently. The
//! pipeline is the sole writer of the state file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use podtagger_feed::{FeedOptions, fetch_feed};
use podtagger_llm::{ChatClient, ClientOptions};
use podtagger_shared::{AppConfig, Episode, EpisodeStore, PodtaggerError, Result, Taxonomy};
use podtagger_storage::{StateFile, load_taxonomy, save_taxonomy};
use rand::Rng;
use tracing::{info, instrument, warn};
use url::Url;

use crate::clean::CleanStage;
use crate::executor::{BatchProgress, BatchReport, EnrichmentStage, ExecutorConfig, run_batches};
use crate::export::{ExportResult, collect_export, write_export};
use crate::ingest::{MergeReport, merge_feed};
use crate::repair::{RepairReport, repair_store};
use crate::tag::{TagStage, TaggingRules};
use crate::taxonomy_gen::{GeneratedTaxonomy, generate_taxonomy};
use crate::validate::{ValidationReport, validate_store};

/// Extra time a task gets beyond the HTTP timeout before the executor gives up on it.
const TASK_TIMEOUT_GRACE_SECS: u64 = 5;

/// Entry point for every command, bound to one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: AppConfig,
    state: StateFile,
    api_key: Option<String>,
}

impl Pipeline {
    /// Bind to `config`; the API key is read from the configured env var, if set.
    pub fn new(config: AppConfig) -> Self {
        let api_key = podtagger_shared::resolve_api_key(&config).ok();
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: AppConfig, api_key: Option<String>) -> Self {
        let state = StateFile::new(&config.pipeline.state_file);
        Self {
            config,
            state,
            api_key,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    pub fn has_model(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn load_store(&self) -> Result<EpisodeStore> {
        self.state.load()
    }

    pub fn taxonomy_path(&self) -> PathBuf {
        PathBuf::from(&self.config.pipeline.taxonomy_file)
    }

    pub fn load_taxonomy(&self) -> Result<Taxonomy> {
        load_taxonomy(&self.taxonomy_path())
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// Fetch the feed and merge new episodes into the store.
    #[instrument(skip_all, fields(url = %feed_url))]
    pub async fn ingest(&self, feed_url: &Url) -> Result<MergeReport> {
        let mut store = self.state.load()?;
        let opts = FeedOptions {
            timeout_secs: self.config.feed.timeout_secs,
        };
        let entries = fetch_feed(feed_url, &opts).await?;

        let report = merge_feed(&mut store, &entries, Utc::now());
        self.state.save(&store)?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Enrichment stages
    // -----------------------------------------------------------------------

    /// Clean every episode without a cleaned description.
    ///
    /// Without an API key the descriptions are only stripped of markup.
    pub async fn clean(&self, progress: &dyn BatchProgress) -> Result<BatchReport> {
        let stage = match &self.api_key {
            Some(key) => {
                let client = self.chat_client(key.clone(), self.config.llm.timeout_secs)?;
                CleanStage::with_model(client, &self.config.llm.model)
            }
            None => {
                warn!(
                    env = %self.config.llm.api_key_env,
                    "no API key set, cleaning descriptions by stripping markup only"
                );
                CleanStage::markup_only()
            }
        };
        let timeout = stage.uses_model().then(|| self.task_timeout());

        self.run_stage(Episode::needs_cleaning, stage, timeout, progress)
            .await
    }

    /// Tag every cleaned episode without tags. Requires an API key.
    pub async fn tag(&self, progress: &dyn BatchProgress) -> Result<BatchReport> {
        let key = self.require_api_key()?;
        let taxonomy = self.load_taxonomy()?;
        let rules = match &self.config.tagging.rules_file {
            Some(path) => TaggingRules::from_file(Path::new(path))?,
            None => TaggingRules::default(),
        };

        let client = self.chat_client(key, self.config.llm.timeout_secs)?;
        let stage = TagStage::new(client, &self.config.llm.model, taxonomy, rules);

        self.run_stage(Episode::needs_tagging, stage, Some(self.task_timeout()), progress)
            .await
    }

    async fn run_stage<S: EnrichmentStage>(
        &self,
        eligible: fn(&Episode) -> bool,
        stage: S,
        task_timeout: Option<Duration>,
        progress: &dyn BatchProgress,
    ) -> Result<BatchReport> {
        let mut store = self.state.load()?;
        let eligible = store.select(eligible);
        if eligible.is_empty() {
            info!(stage = S::NAME, "nothing to do");
            return Ok(BatchReport::default());
        }

        let config = ExecutorConfig {
            width: self.config.pipeline.concurrency,
            task_timeout,
        };
        let report = run_batches(
            &mut store,
            &eligible,
            Arc::new(stage),
            &config,
            |store: &EpisodeStore| self.state.save(store),
            progress,
        )
        .await?;

        self.state.save(&store)?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Validate / fix
    // -----------------------------------------------------------------------

    /// Check every tagged episode. Never writes.
    pub fn validate(&self) -> Result<ValidationReport> {
        let store = self.state.load()?;
        let taxonomy = self.load_taxonomy()?;
        Ok(validate_store(&store, &taxonomy))
    }

    /// Repair every tagged episode and persist the store.
    pub fn fix(&self) -> Result<RepairReport> {
        let mut store = self.state.load()?;
        let taxonomy = self.load_taxonomy()?;
        let report = repair_store(&mut store, &taxonomy);
        self.state.save(&store)?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Taxonomy generation
    // -----------------------------------------------------------------------

    /// Generate a taxonomy from the cleaned descriptions and save it to the
    /// configured taxonomy file.
    pub async fn generate_taxonomy<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<GeneratedTaxonomy> {
        let key = self.require_api_key()?;
        let store = self.state.load()?;
        let client = self.chat_client(key, self.config.llm.taxonomy_timeout_secs)?;

        let generated = generate_taxonomy(
            &store,
            &client,
            &self.config.llm.taxonomy_model,
            rng,
            self.config.pipeline.taxonomy_token_budget,
        )
        .await?;

        save_taxonomy(&self.taxonomy_path(), &generated.taxonomy)?;
        info!(path = %self.taxonomy_path().display(), "taxonomy saved");
        Ok(generated)
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Write every tagged episode to a new export file.
    pub fn export(&self, now: DateTime<Utc>) -> Result<ExportResult> {
        let store = self.state.load()?;
        let records = collect_export(&store);
        write_export(Path::new(&self.config.pipeline.export_dir), &records, now)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require_api_key(&self) -> Result<String> {
        self.api_key.clone().ok_or_else(|| {
            PodtaggerError::config(format!(
                "language model API key not found. Set the {} environment variable.",
                self.config.llm.api_key_env
            ))
        })
    }

    fn chat_client(&self, api_key: String, timeout_secs: u64) -> Result<ChatClient> {
        let opts = ClientOptions::from_config(&self.config.llm, api_key)
            .with_timeout(Duration::from_secs(timeout_secs));
        ChatClient::new(&opts)
    }

    fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.config.llm.timeout_secs + TASK_TIMEOUT_GRACE_SECS)
    }
}
