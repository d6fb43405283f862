//! Tagging stage: cleaned description → taxonomy-constrained [`TagAssignment`].
//!
//! The prompt is assembled from a swappable rule set, the episode, and the
//! full taxonomy listing. The reply is decoded strictly; anything that does
//! not have the `TagAssignment` shape fails the episode, which stays eligible.

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use podtagger_llm::{ChatClient, ChatRequest, decode_json_reply};
use podtagger_shared::{Episode, PodtaggerError, Result, TagAssignment, TagRecord, Taxonomy};
use regex::Regex;
use tracing::{debug, info};

use crate::executor::EnrichmentStage;
use crate::validate::validate;

/// System message for the tagging call.
const TAG_INSTRUCTION: &str =
    "You are a podcast episode tagger. Always use tags exactly as they appear in the provided taxonomy.";

/// Built-in rule set: several tags per category, never invent tags.
const DEFAULT_RULES: &str = "\
Analyze this podcast episode and assign every relevant tag from the taxonomy below.

Rules:
1. Select 1-3 Format tags describing how the episode is structured.
2. Select 1-3 Theme tags for the broad subjects of the episode.
3. Select 1-3 Track tags for the specific topics covered.
4. Never return an empty list for a category. If nothing fits well, pick the closest, most general tag.
5. Use tags exactly as written in the taxonomy, in the category they are listed under. Do not translate them and never invent new ones.
6. Decide from the title whether the episode belongs to a numbered series or stands alone.
7. If the title carries a series marker such as \"(Ep 3)\" or \"Part 2\", set episode_number to that number; otherwise null.";

/// Output contract appended after the taxonomy.
const OUTPUT_FORMAT: &str = r#"Return only a JSON object in exactly this format:
{"Format": ["tag"], "Theme": ["tag", "tag"], "Track": ["tag", "tag"], "episode_number": number_or_null}"#;

// ---------------------------------------------------------------------------
// Rule set
// ---------------------------------------------------------------------------

/// Instructions placed at the top of the tagging prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggingRules {
    text: String,
}

impl Default for TaggingRules {
    fn default() -> Self {
        Self {
            text: DEFAULT_RULES.to_string(),
        }
    }
}

impl TaggingRules {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read a replacement rule set. A missing or blank file is a config error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PodtaggerError::config(format!("cannot read rules file {}: {e}", path.display()))
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(PodtaggerError::config(format!(
                "rules file {} is empty",
                path.display()
            )));
        }
        info!(path = %path.display(), "using custom tagging rules");
        Ok(Self::new(text))
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

/// `(Ep 12)`, `(Episode 12)`, `Ep. 12`, `Part 3`, `Pt 3`.
static SERIES_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:ep(?:isode)?|part|pt)\.?\s*#?(\d{1,4})\b").expect("valid regex")
});

/// Number of a series marker in `title`, if there is one.
pub fn detect_series_marker(title: &str) -> Option<i64> {
    SERIES_MARKER_RE
        .captures(title)
        .and_then(|caps| caps[1].parse().ok())
}

/// Full user message for one episode.
pub fn build_prompt(rules: &TaggingRules, taxonomy: &Taxonomy, title: &str, description: &str) -> String {
    let mut prompt = String::with_capacity(rules.text().len() + description.len() + 2048);
    prompt.push_str(rules.text());
    prompt.push_str("\n\nEpisode Title: ");
    prompt.push_str(title);
    prompt.push_str("\nEpisode Description: ");
    prompt.push_str(description);
    prompt.push('\n');

    if let Some(number) = detect_series_marker(title) {
        prompt.push_str(&format!(
            "Hint: the title carries a series marker for episode {number}.\n"
        ));
    }

    prompt.push_str("\nValid tags by category (an episode can have several tags from each):\n");
    prompt.push_str(&taxonomy.prompt_listing());
    prompt.push('\n');
    prompt.push_str(OUTPUT_FORMAT);
    prompt
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Episode fields the tagging task needs.
#[derive(Debug, Clone)]
pub struct TagInput {
    pub title: String,
    pub description: String,
}

/// The tagging stage. Requires a model.
#[derive(Debug)]
pub struct TagStage {
    client: ChatClient,
    model: String,
    taxonomy: Taxonomy,
    rules: TaggingRules,
}

impl TagStage {
    pub fn new(client: ChatClient, model: impl Into<String>, taxonomy: Taxonomy, rules: TaggingRules) -> Self {
        Self {
            client,
            model: model.into(),
            taxonomy,
            rules,
        }
    }

    /// Ask the model for tags and decode the reply.
    pub async fn tag(&self, input: &TagInput) -> Result<TagAssignment> {
        let prompt = build_prompt(&self.rules, &self.taxonomy, &input.title, &input.description);
        let request = ChatRequest {
            model: &self.model,
            instruction: TAG_INSTRUCTION,
            content: &prompt,
            temperature: Some(0.0),
        };

        let reply = self.client.complete(&request).await?;
        let assignment: TagAssignment = decode_json_reply(&reply)?;
        debug!(
            format = assignment.format.len(),
            theme = assignment.theme.len(),
            track = assignment.track.len(),
            episode_number = ?assignment.episode_number,
            "tags decoded"
        );
        Ok(assignment)
    }
}

impl EnrichmentStage for TagStage {
    type Input = TagInput;
    type Output = TagAssignment;

    const NAME: &'static str = "tag";

    fn prepare(&self, episode: &Episode) -> TagInput {
        TagInput {
            title: episode.title.clone(),
            description: episode.cleaned_description.clone().unwrap_or_default(),
        }
    }

    fn enrich(
        self: Arc<Self>,
        input: TagInput,
    ) -> impl Future<Output = Result<TagAssignment>> + Send + 'static {
        async move { self.tag(&input).await }
    }

    fn apply(&self, episode: &mut Episode, output: TagAssignment, now: DateTime<Utc>) {
        episode.tags = Some(TagRecord::from(output));
        episode.tagged_at = Some(now);
    }

    /// Stored replies are not filtered; flag the ones `fix` will have to touch.
    fn note(&self, output: &TagAssignment) -> Option<String> {
        let violations = validate(&TagRecord::from(output.clone()), &self.taxonomy);
        if violations.is_empty() {
            return None;
        }
        let details: Vec<String> = violations.iter().map(ToString::to_string).collect();
        Some(format!("needs `fix`: {}", details.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use podtagger_llm::ClientOptions;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn stage_for(server: &MockServer) -> TagStage {
        let client = ChatClient::new(&ClientOptions {
            base_url: server.uri(),
            api_key: "sk-test".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        TagStage::new(client, "test-model", Taxonomy::default(), TaggingRules::default())
    }

    fn reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": content}}]
        }))
    }

    fn input() -> TagInput {
        TagInput {
            title: "The Fall of Rome (Ep 3)".into(),
            description: "Goths at the gates.".into(),
        }
    }

    #[test]
    fn series_markers() {
        assert_eq!(detect_series_marker("The Fall of Rome (Ep 3)"), Some(3));
        assert_eq!(detect_series_marker("Napoleon, Part 2"), Some(2));
        assert_eq!(detect_series_marker("Waterloo (Episode 14)"), Some(14));
        assert_eq!(detect_series_marker("Caesar Pt. 7: Crossing"), Some(7));
        assert_eq!(detect_series_marker("The Epic of Gilgamesh"), None);
        assert_eq!(detect_series_marker("Partisans of 1944"), None);
    }

    #[test]
    fn prompt_contains_episode_taxonomy_and_format() {
        let tax = Taxonomy::default();
        let prompt = build_prompt(&TaggingRules::default(), &tax, "Napoleon, Part 2", "Josephine.");

        assert!(prompt.starts_with("Analyze this podcast episode"));
        assert!(prompt.contains("Episode Title: Napoleon, Part 2"));
        assert!(prompt.contains("Episode Description: Josephine."));
        assert!(prompt.contains("series marker for episode 2"));
        for category in podtagger_shared::Category::ALL {
            for tag in tax.tags(category) {
                assert!(prompt.contains(&format!("- {tag}\n")), "missing {tag}");
            }
        }
        assert!(prompt.trim_end().ends_with("\"episode_number\": number_or_null}"));
    }

    #[test]
    fn custom_rules_replace_default() {
        let rules = TaggingRules::new("Pick exactly one tag per category.");
        let prompt = build_prompt(&rules, &Taxonomy::default(), "Standalone", "x");
        assert!(prompt.starts_with("Pick exactly one tag per category."));
        assert!(!prompt.contains("Hint:"));
    }

    #[test]
    fn rules_file_must_exist_and_have_content() {
        let dir = std::env::temp_dir().join(format!("pt-rules-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        let missing = TaggingRules::from_file(&dir.join("nope.txt")).unwrap_err();
        assert!(matches!(missing, PodtaggerError::Config { .. }));

        let blank = dir.join("blank.txt");
        std::fs::write(&blank, "  \n").unwrap();
        assert!(TaggingRules::from_file(&blank).is_err());

        let good = dir.join("rules.txt");
        std::fs::write(&good, "One tag each.\n").unwrap();
        assert_eq!(TaggingRules::from_file(&good).unwrap().text(), "One tag each.");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn decodes_fenced_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Roman Track"))
            .respond_with(reply(
                "```json\n{\"Format\": [\"Series Episodes\"], \"Theme\": [\"Ancient & Classical Civilizations\"], \"Track\": [\"Roman Track\"], \"episode_number\": 3}\n```",
            ))
            .mount(&server)
            .await;

        let tags = stage_for(&server).tag(&input()).await.unwrap();
        assert_eq!(tags.format, vec!["Series Episodes"]);
        assert_eq!(tags.episode_number, Some(3));
    }

    #[tokio::test]
    async fn prose_reply_is_parse_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply("I think this is about Rome."))
            .mount(&server)
            .await;

        let err = stage_for(&server).tag(&input()).await.unwrap_err();
        assert!(matches!(err, PodtaggerError::Parse { .. }));
    }

    #[tokio::test]
    async fn reply_missing_episode_number_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply(r#"{"Format": ["Series Episodes"], "Theme": [], "Track": []}"#))
            .mount(&server)
            .await;

        assert!(stage_for(&server).tag(&input()).await.is_err());
    }

    fn offline_stage() -> TagStage {
        TagStage::new(
            ChatClient::new(&ClientOptions {
                base_url: "http://127.0.0.1:9".into(),
                api_key: "k".into(),
                timeout: Duration::from_secs(1),
            })
            .unwrap(),
            "m",
            Taxonomy::default(),
            TaggingRules::default(),
        )
    }

    #[test]
    fn note_flags_tags_outside_the_taxonomy() {
        let stage = offline_stage();
        let valid = TagAssignment {
            format: vec!["Standalone Episodes".into()],
            theme: vec!["Military History & Battles".into()],
            track: vec!["World Wars Track".into()],
            episode_number: None,
        };
        assert_eq!(stage.note(&valid), None);

        let invented = TagAssignment {
            format: vec!["Bogus".into()],
            theme: vec![],
            ..valid
        };
        let note = stage.note(&invented).unwrap();
        assert!(note.starts_with("needs `fix`: "));
        assert!(note.contains("invalid Format tags: Bogus"));
        assert!(note.contains("Theme cannot be empty"));
    }

    #[test]
    fn apply_stores_record_and_timestamp() {
        let server_less = TagStage::new(
            ChatClient::new(&ClientOptions {
                base_url: "http://127.0.0.1:9".into(),
                api_key: "k".into(),
                timeout: Duration::from_secs(1),
            })
            .unwrap(),
            "m",
            Taxonomy::default(),
            TaggingRules::default(),
        );
        let mut ep = Episode::new("g1", "T", "d", "", None, Utc::now());
        ep.cleaned_description = Some("d".into());
        assert!(ep.needs_tagging());

        let now = Utc::now();
        server_less.apply(
            &mut ep,
            TagAssignment {
                format: vec!["Standalone Episodes".into()],
                theme: vec!["Military History & Battles".into()],
                track: vec!["World Wars Track".into()],
                episode_number: None,
            },
            now,
        );
        assert!(!ep.needs_tagging());
        assert_eq!(ep.tagged_at, Some(now));
        assert!(ep.tags.unwrap().has_episode_number());
    }
}
