//! Application configuration for podtagger.
//!
//! User config lives at `~/.podtagger/podtagger.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PodtaggerError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "podtagger.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".podtagger";

// ---------------------------------------------------------------------------
// Config structs (matching podtagger.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// RSS feed settings.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Language-model provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Pipeline files and batch sizing.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Tagging rule-set selection.
    #[serde(default)]
    pub tagging: TaggingConfig,
}

/// `[feed]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Feed URL. Empty means "not configured".
    #[serde(default)]
    pub url: String,

    /// Timeout for the feed request.
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_feed_timeout(),
        }
    }
}

fn default_feed_timeout() -> u64 {
    30
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for cleaning and tagging.
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for taxonomy generation.
    #[serde(default = "default_taxonomy_model")]
    pub taxonomy_model: String,

    /// Per-episode call timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Timeout for the single taxonomy generation call.
    #[serde(default = "default_taxonomy_timeout")]
    pub taxonomy_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            taxonomy_model: default_taxonomy_model(),
            timeout_secs: default_llm_timeout(),
            taxonomy_timeout_secs: default_taxonomy_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4.1-mini".into()
}
fn default_taxonomy_model() -> String {
    "o3-mini".into()
}
fn default_llm_timeout() -> u64 {
    30
}
fn default_taxonomy_timeout() -> u64 {
    300
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Persisted episode store.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Persisted taxonomy (falls back to the built-in default when absent).
    #[serde(default = "default_taxonomy_file")]
    pub taxonomy_file: String,

    /// Directory receiving export artifacts.
    #[serde(default = "default_export_dir")]
    pub export_dir: String,

    /// Episodes enriched concurrently per batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum detailed lines printed by validate/fix.
    #[serde(default = "default_report_limit")]
    pub report_limit: usize,

    /// Approximate token budget for the taxonomy generation sample.
    #[serde(default = "default_token_budget")]
    pub taxonomy_token_budget: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            taxonomy_file: default_taxonomy_file(),
            export_dir: default_export_dir(),
            concurrency: default_concurrency(),
            report_limit: default_report_limit(),
            taxonomy_token_budget: default_token_budget(),
        }
    }
}

fn default_state_file() -> String {
    "state.json".into()
}
fn default_taxonomy_file() -> String {
    "taxonomy.json".into()
}
fn default_export_dir() -> String {
    ".".into()
}
fn default_concurrency() -> usize {
    10
}
fn default_report_limit() -> usize {
    10
}
fn default_token_budget() -> usize {
    400_000
}

/// `[tagging]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaggingConfig {
    /// Replacement rule set for the tagging prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_file: Option<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.podtagger/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PodtaggerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.podtagger/podtagger.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PodtaggerError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PodtaggerError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PodtaggerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PodtaggerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PodtaggerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the feed URL: explicit override first, then `[feed] url`.
pub fn resolve_feed_url(config: &AppConfig, override_url: Option<&str>) -> Result<Url> {
    let raw = override_url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(config.feed.url.as_str())
        .trim();

    if raw.is_empty() {
        return Err(PodtaggerError::config(
            "feed URL not set. Pass --feed-url, set RSS_FEED_URL, or set [feed] url in the config file",
        ));
    }

    Url::parse(raw).map_err(|e| PodtaggerError::config(format!("invalid feed URL '{raw}': {e}")))
}

/// Read the API key from the configured env var. Missing or empty is a config error.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(PodtaggerError::config(format!(
            "language model API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("state_file"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[feed]
url = "https://feeds.example.com/history.xml"

[pipeline]
concurrency = 4
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.feed.url, "https://feeds.example.com/history.xml");
        assert_eq!(config.feed.timeout_secs, 30);
        assert_eq!(config.pipeline.concurrency, 4);
        assert_eq!(config.pipeline.report_limit, 10);
        assert_eq!(config.llm.model, "gpt-4.1-mini");
        assert!(config.tagging.rules_file.is_none());
    }

    #[test]
    fn feed_url_override_wins() {
        let mut config = AppConfig::default();
        config.feed.url = "https://a.example.com/feed".into();
        let url = resolve_feed_url(&config, Some("https://b.example.com/rss")).unwrap();
        assert_eq!(url.host_str(), Some("b.example.com"));

        let url = resolve_feed_url(&config, None).unwrap();
        assert_eq!(url.host_str(), Some("a.example.com"));
    }

    #[test]
    fn missing_feed_url_is_config_error() {
        let config = AppConfig::default();
        let err = resolve_feed_url(&config, Some("  ")).unwrap_err();
        assert!(matches!(err, PodtaggerError::Config { .. }));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "PT_TEST_NONEXISTENT_KEY_12345".into();
        let result = resolve_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
