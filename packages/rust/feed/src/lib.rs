//! Feed collaborator: fetch the podcast RSS document and walk it into entries.
//!
//! Only the interface matters to the pipeline: a sequence of
//! [`FeedEntry`] values. Entries without a guid are still returned; the
//! ingestion merger decides to skip them.

mod parser;

use std::time::Duration;

use podtagger_shared::{PodtaggerError, Result};
use reqwest::Client;
use tracing::{info, instrument};
use url::Url;

pub use parser::{FeedEntry, parse_feed};

/// Maximum number of redirects to follow when fetching the feed.
const MAX_REDIRECTS: usize = 5;

/// Default timeout in seconds for the feed request.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum response size we accept (50 MB; long-running shows have big feeds).
const MAX_RESPONSE_SIZE: u64 = 50 * 1024 * 1024;

/// User-Agent string for feed requests.
const USER_AGENT: &str = concat!("podtagger/", env!("CARGO_PKG_VERSION"));

/// Configuration for fetching the feed.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Timeout for the HTTP request in seconds.
    pub timeout_secs: u64,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Fetch the feed at `url` and parse every item.
///
/// Unreachable host, timeout and non-success status are [`PodtaggerError::Network`];
/// a body without a `<channel>` is [`PodtaggerError::Parse`].
#[instrument(skip_all, fields(url = %url))]
pub async fn fetch_feed(url: &Url, opts: &FeedOptions) -> Result<Vec<FeedEntry>> {
    let client = build_client(opts)?;

    info!("fetching feed");
    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| PodtaggerError::Network(format!("{url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PodtaggerError::Network(format!("{url}: HTTP {status}")));
    }

    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_SIZE {
            return Err(PodtaggerError::validation(format!(
                "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
            )));
        }
    }

    let body = response
        .text()
        .await
        .map_err(|e| PodtaggerError::Network(format!("{url}: failed to read body: {e}")))?;

    let entries = parse_feed(&body)?;
    info!(entries = entries.len(), "feed parsed");
    Ok(entries)
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &FeedOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| PodtaggerError::Network(format!("failed to build HTTP client: {e}")))
}
