//! RSS 2.0 structural walk.
//!
//! The document is read with the same lenient markup parser used for HTML,
//! which is enough for the handful of elements an RSS `<item>` carries:
//! - `<guid>`: identity
//! - `<title>`, `<description>`, `<pubDate>`: text content
//! - `<enclosure url="...">`: audio reference
//!
//! CDATA sections are turned into escaped text first, since an HTML parser
//! would otherwise swallow them as comments.

use std::sync::LazyLock;

use podtagger_shared::{PodtaggerError, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One `<item>` as published by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Trimmed guid, `None` when missing or blank.
    pub guid: Option<String>,
    pub title: String,
    /// Raw description (markup entities already decoded once by the feed layer).
    pub description: String,
    pub published_date: String,
    pub enclosure_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Selectors (compiled once)
// ---------------------------------------------------------------------------

static CHANNEL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("channel").expect("channel selector"));
static ITEM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("item").expect("item selector"));
static GUID_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("guid").expect("guid selector"));
static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector"));
static DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("description").expect("description selector"));
// The markup parser lowercases element names.
static PUB_DATE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("pubdate").expect("pubDate selector"));
static ENCLOSURE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("enclosure[url]").expect("enclosure selector"));

/// Matches `<![CDATA[ ... ]]>` across lines.
static CDATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("CDATA regex"));

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse an RSS document into its items, in document order.
///
/// Fails only when the document has no `<channel>`; individual malformed
/// items are returned as-is (a missing guid becomes `None`).
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let prepared = escape_cdata(xml);
    let doc = Html::parse_document(&prepared);

    let channel = doc
        .select(&CHANNEL_SEL)
        .next()
        .ok_or_else(|| PodtaggerError::parse("no <channel> found in feed"))?;

    Ok(channel.select(&ITEM_SEL).map(parse_item).collect())
}

fn parse_item(item: ElementRef<'_>) -> FeedEntry {
    let guid = first_text(item, &GUID_SEL).filter(|g| !g.is_empty());

    FeedEntry {
        guid,
        title: first_text(item, &TITLE_SEL).unwrap_or_default(),
        description: first_text(item, &DESCRIPTION_SEL).unwrap_or_default(),
        published_date: first_text(item, &PUB_DATE_SEL).unwrap_or_default(),
        enclosure_url: item
            .select(&ENCLOSURE_SEL)
            .next()
            .and_then(|el| el.value().attr("url"))
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(String::from),
    }
}

/// Trimmed text of the first matching descendant.
fn first_text(item: ElementRef<'_>, selector: &Selector) -> Option<String> {
    item.select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

/// Replace every CDATA section with its markup-escaped content.
fn escape_cdata(xml: &str) -> String {
    CDATA_RE
        .replace_all(xml, |caps: &regex::Captures| {
            caps[1]
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
        })
        .to_string()
}
