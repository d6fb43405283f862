//! podtagger CLI: keep a podcast episode catalog enriched.
//!
//! Pulls episodes from an RSS feed, cleans their descriptions, tags them
//! against a taxonomy with a language model, and exports the results.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
