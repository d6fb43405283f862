//! Markup stripping for episode descriptions.
//!
//! Each pass is a function `&str -> String` applied in sequence. The result
//! is plain prose: tags removed, entities decoded, whitespace collapsed.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

/// Turn a raw feed description into plain text.
pub fn strip_markup(raw: &str) -> String {
    let mut result = separate_blocks(raw);
    result = extract_text(&result);
    result = collapse_whitespace(&result);
    result
}

// ---------------------------------------------------------------------------
// Pass 1: Keep words apart across block boundaries
// ---------------------------------------------------------------------------

/// Put a space after line breaks and closing block tags so that
/// `<p>a</p><p>b</p>` does not become `ab`.
fn separate_blocks(html: &str) -> String {
    static BLOCK_END_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<br\s*/?>|</(?:p|div|li|ul|ol|h[1-6]|blockquote|tr)\s*>")
            .expect("valid regex")
    });

    BLOCK_END_RE.replace_all(html, "$0 ").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Drop tags, decode entities
// ---------------------------------------------------------------------------

/// Text content of the fragment. Entities (`&amp;`, `&#39;`, `&nbsp;`, ...)
/// come back decoded; `<script>`/`<style>` bodies are dropped.
fn extract_text(html: &str) -> String {
    static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(?:script|style)\s*>").expect("valid regex")
    });

    let without_scripts = SCRIPT_RE.replace_all(html, " ");
    let fragment = Html::parse_fragment(&without_scripts);
    fragment.root_element().text().collect()
}

// ---------------------------------------------------------------------------
// Pass 3: Collapse whitespace
// ---------------------------------------------------------------------------

/// Collapse every run of whitespace (including non-breaking spaces) to one space.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
