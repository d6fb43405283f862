//! Taxonomy generation from a random sample of cleaned descriptions.
//!
//! The sample is shuffled and cut at an approximate token budget
//! (one token ≈ four characters), then a single model call proposes a
//! minimal taxonomy. The result is decoded strictly; persisting it is the
//! caller's decision.

use std::collections::HashSet;

use podtagger_llm::{ChatClient, ChatRequest, decode_json_reply};
use podtagger_shared::{Category, EpisodeStore, PodtaggerError, Result, Taxonomy};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{info, instrument};

/// Default content budget in approximate tokens.
pub const DEFAULT_TOKEN_BUDGET: usize = 400_000;

const TAXONOMY_INSTRUCTION: &str = "You design minimal, efficient taxonomies for podcasts. \
Produce the smallest set of categories that still classifies every episode. \
Consolidate aggressively; every episode must fit somewhere.";

/// Episodes selected for the generation prompt.
#[derive(Debug, Clone)]
pub struct Sample {
    /// `Title: ...\nDescription: ...` blocks.
    pub text: String,
    pub included: usize,
    /// Episodes with a cleaned description.
    pub available: usize,
    pub approx_tokens: usize,
}

/// What the model proposed, with sampling statistics.
#[derive(Debug, Clone)]
pub struct GeneratedTaxonomy {
    pub taxonomy: Taxonomy,
    pub included: usize,
    pub available: usize,
    pub approx_tokens: usize,
}

/// Shuffle every cleaned episode and keep entries until `token_budget` would be exceeded.
pub fn build_sample<R: Rng + ?Sized>(store: &EpisodeStore, rng: &mut R, token_budget: usize) -> Result<Sample> {
    let mut entries: Vec<String> = store
        .episodes
        .values()
        .filter_map(|ep| {
            ep.cleaned_description
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|d| format!("Title: {}\nDescription: {d}\n\n", ep.title))
        })
        .collect();

    if entries.is_empty() {
        return Err(PodtaggerError::validation(
            "no cleaned descriptions found, run `clean` first",
        ));
    }

    let available = entries.len();
    entries.shuffle(rng);

    let mut sample = Sample {
        text: String::new(),
        included: 0,
        available,
        approx_tokens: 0,
    };
    for entry in entries {
        let tokens = entry.len() / 4;
        if sample.approx_tokens + tokens > token_budget {
            break;
        }
        sample.text.push_str(&entry);
        sample.approx_tokens += tokens;
        sample.included += 1;
    }

    Ok(sample)
}

fn build_prompt(sample: &Sample) -> String {
    format!(
        "Analyze these podcast episodes and create a MINIMAL but COMPREHENSIVE taxonomy.\n\
         Write every tag in the language of the episodes.\n\n\
         Requirements:\n\
         - Format: 3-7 tags for how episodes are structured (interview, solo, series, ...)\n\
         - Theme: 5-8 broad subject areas\n\
         - Track: 8-15 specific recurring topics\n\
         - Every episode must fit at least one tag of each category\n\
         - Prefer fewer, broader, reusable tags; merge similar concepts\n\
         - Include a general catch-all tag if outliers need one\n\n\
         PODCAST EPISODES ({included} of {available} total):\n{text}\n\
         Return ONLY a JSON object in this exact format:\n\
         {{\"Format\": [\"...\"], \"Theme\": [\"...\"], \"Track\": [\"...\"]}}",
        included = sample.included,
        available = sample.available,
        text = sample.text,
    )
}

/// Sample the store and ask `model` for a taxonomy.
#[instrument(skip_all, fields(model = model, budget = token_budget))]
pub async fn generate_taxonomy<R: Rng + ?Sized>(
    store: &EpisodeStore,
    client: &ChatClient,
    model: &str,
    rng: &mut R,
    token_budget: usize,
) -> Result<GeneratedTaxonomy> {
    let sample = build_sample(store, rng, token_budget)?;
    info!(
        included = sample.included,
        available = sample.available,
        approx_tokens = sample.approx_tokens,
        "sample built"
    );

    let prompt = build_prompt(&sample);
    let reply = client
        .complete(&ChatRequest {
            model,
            instruction: TAXONOMY_INSTRUCTION,
            content: &prompt,
            temperature: None,
        })
        .await?;

    let taxonomy = normalize(decode_json_reply(&reply)?);
    let empty = taxonomy.empty_categories();
    if !empty.is_empty() {
        let names: Vec<&str> = empty.iter().map(Category::key).collect();
        return Err(PodtaggerError::Enrichment(format!(
            "generated taxonomy has empty categories: {}",
            names.join(", ")
        )));
    }

    Ok(GeneratedTaxonomy {
        taxonomy,
        included: sample.included,
        available: sample.available,
        approx_tokens: sample.approx_tokens,
    })
}

/// Trim tags, drop blanks and repeated tags (first occurrence wins).
fn normalize(taxonomy: Taxonomy) -> Taxonomy {
    fn clean(tags: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        tags.into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect()
    }

    Taxonomy {
        format: clean(taxonomy.format),
        theme: clean(taxonomy.theme),
        track: clean(taxonomy.track),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use podtagger_llm::ClientOptions;
    use podtagger_shared::Episode;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(n: usize, description_len: usize) -> EpisodeStore {
        let mut store = EpisodeStore::default();
        for i in 0..n {
            let guid = format!("g{i}");
            let mut ep = Episode::new(&guid, format!("Episode {i}"), "", "", None, Utc::now());
            ep.cleaned_description = Some("x".repeat(description_len));
            store.episodes.insert(guid, ep);
        }
        store
            .episodes
            .insert("raw".into(), Episode::new("raw", "Uncleaned", "<p>x</p>", "", None, Utc::now()));
        store
    }

    fn client_for(server: &MockServer) -> ChatClient {
        ChatClient::new(&ClientOptions {
            base_url: server.uri(),
            api_key: "sk-test".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": content}}]
        }))
    }

    #[test]
    fn sample_respects_budget() {
        // Each entry is ~430 chars, ~107 tokens.
        let store = store(20, 400);
        let mut rng = StdRng::seed_from_u64(7);
        let sample = build_sample(&store, &mut rng, 500).unwrap();

        assert_eq!(sample.available, 20);
        assert_eq!(sample.included, 4);
        assert!(sample.approx_tokens <= 500);
        assert_eq!(sample.text.matches("Title: ").count(), 4);
        assert!(!sample.text.contains("Uncleaned"));
    }

    #[test]
    fn sample_is_deterministic_for_a_seed() {
        let store = store(30, 10);
        let a = build_sample(&store, &mut StdRng::seed_from_u64(1), DEFAULT_TOKEN_BUDGET).unwrap();
        let b = build_sample(&store, &mut StdRng::seed_from_u64(1), DEFAULT_TOKEN_BUDGET).unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.included, 30);
    }

    #[test]
    fn empty_store_is_validation_error() {
        let err = build_sample(&EpisodeStore::default(), &mut StdRng::seed_from_u64(1), 100).unwrap_err();
        assert!(matches!(err, PodtaggerError::Validation { .. }));
    }

    #[tokio::test]
    async fn decodes_and_normalizes_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("o3-mini"))
            .and(body_string_contains("PODCAST EPISODES (3 of 3 total)"))
            .respond_with(reply(
                "```json\n{\"Format\": [\"Interview\", \" Interview \", \"Solo\"], \"Theme\": [\"Wine\"], \"Track\": [\"Riesling\", \"\"]}\n```",
            ))
            .mount(&server)
            .await;

        let generated = generate_taxonomy(
            &store(3, 20),
            &client_for(&server),
            "o3-mini",
            &mut StdRng::seed_from_u64(3),
            DEFAULT_TOKEN_BUDGET,
        )
        .await
        .unwrap();

        assert_eq!(generated.taxonomy.format, vec!["Interview", "Solo"]);
        assert_eq!(generated.taxonomy.track, vec!["Riesling"]);
        assert_eq!(generated.included, 3);
    }

    #[tokio::test]
    async fn empty_category_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply(r#"{"Format": ["Solo"], "Theme": [], "Track": ["Riesling"]}"#))
            .mount(&server)
            .await;

        let err = generate_taxonomy(
            &store(2, 20),
            &client_for(&server),
            "o3-mini",
            &mut StdRng::seed_from_u64(3),
            DEFAULT_TOKEN_BUDGET,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("empty categories: Theme"));
    }

    #[tokio::test]
    async fn non_json_reply_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply("Here is a taxonomy: Format - Solo"))
            .mount(&server)
            .await;

        let err = generate_taxonomy(
            &store(2, 20),
            &client_for(&server),
            "o3-mini",
            &mut StdRng::seed_from_u64(3),
            DEFAULT_TOKEN_BUDGET,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PodtaggerError::Parse { .. }));
    }
}
