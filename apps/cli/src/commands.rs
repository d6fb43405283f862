//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use podtagger_core::{BatchProgress, BatchReport, Pipeline};
use podtagger_shared::{
    AppConfig, Category, init_config, load_config, load_config_from, resolve_feed_url,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// podtagger — enrich podcast episodes with clean descriptions and taxonomy tags.
#[derive(Parser)]
#[command(
    name = "podtagger",
    version,
    about = "Ingest a podcast feed, clean and tag its episodes, and export the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.podtagger/podtagger.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch the feed and add episodes not seen before.
    Ingest {
        /// Feed URL (overrides `[feed] url`).
        #[arg(long, env = "RSS_FEED_URL")]
        feed_url: Option<String>,
    },

    /// Clean the descriptions of episodes not cleaned yet.
    Clean,

    /// Tag cleaned episodes that have no tags yet.
    Tag,

    /// Check stored tags against the taxonomy.
    Validate,

    /// Repair invalid tags; unsalvageable tags are removed.
    Fix,

    /// Generate a taxonomy from the cleaned descriptions.
    GenerateTaxonomy,

    /// Export tagged episodes to a new timestamped JSON file.
    Export,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "podtagger=info",
        1 => "podtagger=debug",
        _ => "podtagger=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Command::Ingest { feed_url } => cmd_ingest(config, feed_url.as_deref()).await,
        Command::Clean => cmd_clean(config).await,
        Command::Tag => cmd_tag(config).await,
        Command::Validate => cmd_validate(config),
        Command::Fix => cmd_fix(config),
        Command::GenerateTaxonomy => cmd_generate_taxonomy(config).await,
        Command::Export => cmd_export(config),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_ingest(config: AppConfig, feed_url: Option<&str>) -> Result<()> {
    let url = resolve_feed_url(&config, feed_url)?;
    info!(%url, "ingesting feed");

    let pipeline = Pipeline::new(config);
    let report = pipeline.ingest(&url).await?;

    println!("Added {} new episodes", report.inserted);
    if report.skipped_invalid > 0 {
        println!("Skipped {} entries without a guid", report.skipped_invalid);
    }
    println!("Total episodes: {}", report.total);
    Ok(())
}

async fn cmd_clean(config: AppConfig) -> Result<()> {
    let pipeline = Pipeline::new(config);
    if !pipeline.has_model() {
        println!("No API key set, stripping markup only");
    }

    let progress = CliProgress::new();
    let report = pipeline.clean(&progress).await;
    progress.finish();
    let report = report?;

    if report.attempted == 0 {
        println!("No episodes to clean");
        return Ok(());
    }
    print_batch_summary("cleaned", &report);
    Ok(())
}

async fn cmd_tag(config: AppConfig) -> Result<()> {
    let pipeline = Pipeline::new(config);

    let progress = CliProgress::new();
    let report = pipeline.tag(&progress).await;
    progress.finish();
    let report = report?;

    if report.attempted == 0 {
        println!("No episodes to tag");
        return Ok(());
    }
    print_batch_summary("tagged", &report);
    Ok(())
}

fn cmd_validate(config: AppConfig) -> Result<()> {
    let limit = config.pipeline.report_limit;
    let report = Pipeline::new(config).validate()?;

    println!("Valid episodes: {}", report.valid);
    println!("Invalid episodes: {}", report.invalid.len());
    if !report.invalid.is_empty() {
        println!("\nValidation errors:");
        print_limited(report.invalid.iter().map(ToString::to_string), limit);
    }
    Ok(())
}

fn cmd_fix(config: AppConfig) -> Result<()> {
    let limit = config.pipeline.report_limit;
    let report = Pipeline::new(config).fix()?;

    println!("Fixed {} episodes", report.repaired.len());
    if report.reset_count() > 0 {
        println!(
            "Removed tags from {} episodes; run `tag` to tag them again",
            report.reset_count()
        );
    }
    if !report.repaired.is_empty() {
        println!("\nFixes applied:");
        print_limited(report.repaired.iter().map(ToString::to_string), limit);
    }
    Ok(())
}

async fn cmd_generate_taxonomy(config: AppConfig) -> Result<()> {
    let pipeline = Pipeline::new(config);

    let spinner = CliProgress::new();
    spinner.bar.set_message("Generating taxonomy...");
    let generated = pipeline.generate_taxonomy(&mut rand::thread_rng()).await;
    spinner.finish();
    let generated = generated?;

    println!(
        "Included {} of {} episodes (~{} tokens)",
        generated.included, generated.available, generated.approx_tokens
    );
    println!(
        "✓ Taxonomy generated and saved to {}",
        pipeline.taxonomy_path().display()
    );
    for category in Category::ALL {
        println!("\n{category}:");
        for tag in generated.taxonomy.tags(category) {
            println!("  - {tag}");
        }
    }
    Ok(())
}

fn cmd_export(config: AppConfig) -> Result<()> {
    let result = Pipeline::new(config).export(chrono::Utc::now())?;
    println!(
        "Exported {} episodes to {}",
        result.count,
        result.path.display()
    );
    println!("SHA-256: {}", result.sha256);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_batch_summary(verb: &str, report: &BatchReport) {
    println!("Total {verb}: {} episodes", report.succeeded);
    if !report.failed.is_empty() {
        println!(
            "Failed: {} episodes (they stay eligible for the next run)",
            report.failed.len()
        );
    }
}

/// Print at most `limit` lines, then a count of the rest.
fn print_limited(lines: impl ExactSizeIterator<Item = String>, limit: usize) {
    let total = lines.len();
    for line in lines.take(limit) {
        println!("  - {line}");
    }
    if total > limit {
        println!("  ... and {} more", total - limit);
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Batch progress on an indicatif spinner; markers are printed above it.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            bar.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
        }
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BatchProgress for CliProgress {
    fn started(&self, stage: &str, total: usize) {
        self.bar.println(format!("Running {stage} on {total} episodes..."));
        self.bar.set_message(format!("{stage}: 0/{total}"));
    }

    fn succeeded(&self, title: &str, note: Option<&str>) {
        match note {
            Some(note) => self.bar.println(format!("✓ {title} ({note})")),
            None => self.bar.println(format!("✓ {title}")),
        }
    }

    fn failed(&self, title: &str, error: &str) {
        self.bar.println(format!("✗ {title}: {error}"));
    }

    fn batch_saved(&self, done: usize, total: usize) {
        self.bar.println(format!("  Batch saved ({done}/{total})"));
        self.bar.set_message(format!("{done}/{total}"));
    }
}
