//! End-to-end runs of the pipeline against a mock feed and a mock model,
//! with state persisted to a temp directory.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use podtagger_core::export::ExportRecord;
use podtagger_core::validate::validate;
use podtagger_core::{Pipeline, SilentProgress};
use podtagger_shared::{AppConfig, Episode, EpisodeStore, PodtaggerError, TagRecord, Taxonomy};
use podtagger_storage::StateFile;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pt-pipeline-test-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config_in(dir: &Path, llm_base_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.state_file = dir.join("state.json").to_string_lossy().into_owned();
    config.pipeline.taxonomy_file = dir.join("taxonomy.json").to_string_lossy().into_owned();
    config.pipeline.export_dir = dir.join("exports").to_string_lossy().into_owned();
    config.llm.base_url = llm_base_url.to_string();
    config.llm.timeout_secs = 5;
    config
}

fn rss(items: &[(&str, &str, &str)]) -> String {
    let mut body = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Show</title>"#);
    for (guid, title, description) in items {
        body.push_str(&format!(
            "<item><guid>{guid}</guid><title>{title}</title><description>{description}</description>\
             <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate></item>"
        ));
    }
    body.push_str("<item><title>No guid</title></item></channel></rss>");
    body
}

async fn feed_server(body: String) -> (MockServer, Url) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    let url = Url::parse(&format!("{}/feed.xml", server.uri())).unwrap();
    (server, url)
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    }))
}

fn cleaned_episode(guid: &str, title: &str, published: &str) -> Episode {
    let mut ep = Episode::new(guid, title, "<p>raw</p>", published, None, Utc::now());
    ep.cleaned_description = Some(format!("About {title}."));
    ep.cleaned_at = Some(Utc::now());
    ep
}

fn write_store(config: &AppConfig, episodes: Vec<Episode>) {
    let mut store = EpisodeStore::default();
    for ep in episodes {
        store.episodes.insert(ep.guid.clone(), ep);
    }
    StateFile::new(&config.pipeline.state_file).save(&store).unwrap();
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingest_is_idempotent_and_never_refreshes() {
    let tmp = temp_dir();
    let (_server, url) = feed_server(rss(&[("a", "First", "one"), ("b", "Second", "two")])).await;
    let pipeline = Pipeline::with_api_key(config_in(&tmp, "http://unused"), None);

    let first = pipeline.ingest(&url).await.unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(first.skipped_invalid, 1);

    // Enrich one episode, then ingest the unchanged feed again.
    let mut store = pipeline.load_store().unwrap();
    let ep = store.get_mut("a").unwrap();
    ep.cleaned_description = Some("kept".into());
    ep.cleaned_at = Some(Utc::now());
    pipeline.state().save(&store).unwrap();
    let before = pipeline.load_store().unwrap();

    let second = pipeline.ingest(&url).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_present, 2);
    assert_eq!(pipeline.load_store().unwrap(), before);

    let _ = std::fs::remove_dir_all(&tmp);
}

#[tokio::test]
async fn ingest_then_clean_without_model() {
    let tmp = temp_dir();
    let (_server, url) = feed_server(rss(&[("g1", "T", "&lt;p&gt;Hi &amp;amp; bye&lt;/p&gt;")])).await;
    let pipeline = Pipeline::with_api_key(config_in(&tmp, "http://unused"), None);

    pipeline.ingest(&url).await.unwrap();
    let store = pipeline.load_store().unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.get("g1").unwrap().cleaned_description.is_none());

    let report = pipeline.clean(&SilentProgress).await.unwrap();
    assert_eq!(report.succeeded, 1);

    let store = pipeline.load_store().unwrap();
    let ep = store.get("g1").unwrap();
    assert_eq!(ep.cleaned_description.as_deref(), Some("Hi & bye"));
    assert!(ep.cleaned_at.is_some());

    // Nothing left to clean.
    let again = pipeline.clean(&SilentProgress).await.unwrap();
    assert_eq!(again.attempted, 0);

    let _ = std::fs::remove_dir_all(&tmp);
}

#[tokio::test]
async fn unreachable_feed_is_transport_error_and_state_untouched() {
    let tmp = temp_dir();
    let pipeline = Pipeline::with_api_key(config_in(&tmp, "http://unused"), None);
    let url = Url::parse("http://127.0.0.1:9/feed.xml").unwrap();

    let err = pipeline.ingest(&url).await.unwrap_err();
    assert!(err.is_transport());
    assert!(!Path::new(&pipeline.config().pipeline.state_file).exists());

    let _ = std::fs::remove_dir_all(&tmp);
}

// ---------------------------------------------------------------------------
// Batch isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_failing_episode_does_not_block_the_batch() {
    let tmp = temp_dir();
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("titled 'Episode 4'"))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(1)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .respond_with(chat_reply("Cleaned by model."))
        .mount(&llm)
        .await;

    let config = config_in(&tmp, &llm.uri());
    let episodes = (0..10)
        .map(|i| Episode::new(format!("g{i}"), format!("Episode {i}"), "<p>desc</p>", "", None, Utc::now()))
        .collect();
    write_store(&config, episodes);

    let pipeline = Pipeline::with_api_key(config, Some("sk-test".into()));
    let report = pipeline.clean(&SilentProgress).await.unwrap();
    assert_eq!(report.attempted, 10);
    assert_eq!(report.succeeded, 9);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "g4");

    let persisted = pipeline.load_store().unwrap();
    assert_eq!(persisted.select(|e| e.cleaned_description.is_some()).len(), 9);
    assert_eq!(
        persisted.get("g0").unwrap().cleaned_description.as_deref(),
        Some("Cleaned by model.")
    );
    assert_eq!(persisted.select(Episode::needs_cleaning), vec!["g4"]);

    let _ = std::fs::remove_dir_all(&tmp);
}

// ---------------------------------------------------------------------------
// Tag → validate → fix → export
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tag_validate_fix_export() {
    let tmp = temp_dir();
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("Episode Title: The Bad One"))
        .respond_with(chat_reply(
            r#"{"Format": ["Bogus"], "Theme": [], "Track": ["Roman Track"], "episode_number": null}"#,
        ))
        .with_priority(1)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("Episode Title: Broken Reply"))
        .respond_with(chat_reply("Sorry, I cannot help with that."))
        .with_priority(1)
        .mount(&llm)
        .await;
    Mock::given(method("POST"))
        .respond_with(chat_reply(
            "```json\n{\"Format\": [\"Standalone Episodes\"], \"Theme\": [\"Military History & Battles\"], \"Track\": [\"World Wars Track\"], \"episode_number\": null}\n```",
        ))
        .mount(&llm)
        .await;

    let config = config_in(&tmp, &llm.uri());
    write_store(
        &config,
        vec![
            cleaned_episode("jan", "January Battle", "Mon, 01 Jan 2024 00:00:00 +0000"),
            cleaned_episode("jun", "June Battle", "Sat, 01 Jun 2024 00:00:00 +0000"),
            cleaned_episode("bad", "The Bad One", "Sun, 01 Dec 2024 00:00:00 +0000"),
            cleaned_episode("err", "Broken Reply", "Sun, 01 Dec 2024 00:00:00 +0000"),
            Episode::new("raw", "Not cleaned", "<p>x</p>", "", None, Utc::now()),
        ],
    );
    let pipeline = Pipeline::with_api_key(config, Some("sk-test".into()));

    let tagged = pipeline.tag(&SilentProgress).await.unwrap();
    assert_eq!(tagged.attempted, 4);
    assert_eq!(tagged.succeeded, 3);
    assert_eq!(tagged.failed[0].0, "err");
    assert!(pipeline.load_store().unwrap().get("err").unwrap().needs_tagging());

    let validation = pipeline.validate().unwrap();
    assert_eq!(validation.valid, 2);
    assert_eq!(validation.invalid.len(), 1);
    assert_eq!(validation.invalid[0].guid, "bad");

    let repair = pipeline.fix().unwrap();
    assert_eq!(repair.reset_count(), 1);
    let store = pipeline.load_store().unwrap();
    assert!(store.get("bad").unwrap().tags.is_none());

    // Repaired store satisfies the validity invariant; a second fix changes nothing.
    let taxonomy = Taxonomy::default();
    for ep in store.episodes.values() {
        if let Some(tags) = &ep.tags {
            assert!(validate(tags, &taxonomy).is_empty());
        }
    }
    assert!(pipeline.fix().unwrap().repaired.is_empty());
    assert_eq!(pipeline.load_store().unwrap(), store);

    let now = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let export = pipeline.export(now).unwrap();
    assert_eq!(export.count, 2);
    assert!(export.path.ends_with("export_20250102_030405.json"));
    let records: Vec<ExportRecord> =
        serde_json::from_str(&std::fs::read_to_string(&export.path).unwrap()).unwrap();
    let guids: Vec<&str> = records.iter().map(|r| r.guid.as_str()).collect();
    assert_eq!(guids, vec!["jun", "jan"]);

    let _ = std::fs::remove_dir_all(&tmp);
}

#[tokio::test]
async fn repair_resets_unsalvageable_persisted_tags() {
    let tmp = temp_dir();
    let config = config_in(&tmp, "http://unused");
    let mut ep = cleaned_episode("g1", "Rome", "2024-01-01");
    ep.tags = Some(
        serde_json::from_value::<TagRecord>(json!({
            "Format": ["Bogus"],
            "Theme": [],
            "Track": ["Roman Track"],
            "episode_number": "3"
        }))
        .unwrap(),
    );
    ep.tagged_at = Some(Utc::now());
    write_store(&config, vec![ep]);

    let pipeline = Pipeline::with_api_key(config, None);
    let report = pipeline.fix().unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.reset_count(), 1);

    let ep = pipeline.load_store().unwrap().get("g1").cloned().unwrap();
    assert!(ep.tags.is_none());
    assert!(ep.tagged_at.is_none());
    assert_eq!(ep.cleaned_description.as_deref(), Some("About Rome."));

    let _ = std::fs::remove_dir_all(&tmp);
}

// ---------------------------------------------------------------------------
// Configuration failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tag_without_api_key_fails_before_any_batch() {
    let tmp = temp_dir();
    let config = config_in(&tmp, "http://unused");
    write_store(&config, vec![cleaned_episode("g1", "Rome", "")]);
    let before = std::fs::read_to_string(&config.pipeline.state_file).unwrap();

    let pipeline = Pipeline::with_api_key(config, None);
    let err = pipeline.tag(&SilentProgress).await.unwrap_err();
    assert!(matches!(err, PodtaggerError::Config { .. }));
    assert!(err.to_string().contains("OPENAI_API_KEY"));

    let after = std::fs::read_to_string(&pipeline.config().pipeline.state_file).unwrap();
    assert_eq!(before, after);

    let _ = std::fs::remove_dir_all(&tmp);
}

#[tokio::test]
async fn malformed_taxonomy_file_is_fatal() {
    let tmp = temp_dir();
    let config = config_in(&tmp, "http://unused");
    std::fs::write(&config.pipeline.taxonomy_file, "{\"Format\": 1}").unwrap();

    let pipeline = Pipeline::with_api_key(config, None);
    let err = pipeline.validate().unwrap_err();
    assert!(matches!(err, PodtaggerError::Config { .. }));

    let _ = std::fs::remove_dir_all(&tmp);
}

// ---------------------------------------------------------------------------
// Taxonomy generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generated_taxonomy_is_saved_and_used() {
    let tmp = temp_dir();
    let llm = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("o3-mini"))
        .respond_with(chat_reply(
            r#"{"Format": ["Interview"], "Theme": ["Wine Regions"], "Track": ["Riesling"]}"#,
        ))
        .mount(&llm)
        .await;

    let config = config_in(&tmp, &llm.uri());
    write_store(&config, vec![cleaned_episode("g1", "Mosel", "")]);
    let pipeline = Pipeline::with_api_key(config, Some("sk-test".into()));

    let generated = pipeline
        .generate_taxonomy(&mut StdRng::seed_from_u64(42))
        .await
        .unwrap();
    assert_eq!(generated.included, 1);

    let loaded = pipeline.load_taxonomy().unwrap();
    assert_eq!(loaded, generated.taxonomy);
    assert_eq!(loaded.format, vec!["Interview"]);

    let _ = std::fs::remove_dir_all(&tmp);
}
