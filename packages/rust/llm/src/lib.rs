//! Language-model collaborator.
//!
//! A thin client for OpenAI-compatible `/chat/completions` endpoints. A
//! request is an `{instruction, content}` pair; the response is the text of
//! the first choice. Failures are split in two:
//! - [`PodtaggerError::Network`]: the call did not complete (unreachable,
//!   timeout, rate limited, provider 5xx). Worth retrying on the next run.
//! - [`PodtaggerError::Enrichment`]: the provider answered, but with an error
//!   or without usable text.

use std::time::Duration;

use podtagger_shared::{LlmConfig, PodtaggerError, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

/// User-Agent string for model requests.
const USER_AGENT: &str = concat!("podtagger/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, serde::Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, serde::Deserialize)]
struct WireChoice {
    message: WireReply,
}

#[derive(Debug, serde::Deserialize)]
struct WireReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// One chat completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    /// System message.
    pub instruction: &'a str,
    /// User message.
    pub content: &'a str,
    /// `None` leaves the provider default (reasoning models reject 0.0).
    pub temperature: Option<f32>,
}

/// Connection settings for a [`ChatClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ClientOptions {
    /// Options for the per-episode client (`[llm] timeout_secs`).
    pub fn from_config(config: &LlmConfig, api_key: String) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Same endpoint with a different timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// OpenAI-compatible chat completions client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl ChatClient {
    pub fn new(opts: &ClientOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| PodtaggerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", opts.base_url.trim_end_matches('/')),
            api_key: opts.api_key.clone(),
        })
    }

    /// Send one request and return the trimmed reply text.
    #[instrument(skip_all, fields(model = request.model))]
    pub async fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let body = WireRequest {
            model: request.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: request.instruction,
                },
                WireMessage {
                    role: "user",
                    content: request.content,
                },
            ],
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PodtaggerError::Network(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = &detail[..floor_char_boundary(&detail, 200)];
            return Err(classify_status(status, detail));
        }

        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| PodtaggerError::Enrichment(format!("invalid model response: {e}")))?;

        if let Some(usage) = &parsed.usage {
            debug!(
                tokens_in = usage.prompt_tokens,
                tokens_out = usage.completion_tokens,
                "model call complete"
            );
        }

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(PodtaggerError::Enrichment("empty model response".into()));
        }

        Ok(text)
    }
}

/// Rate limiting and provider outages are transport failures; other
/// statuses mean the provider refused this particular request.
fn classify_status(status: StatusCode, detail: &str) -> PodtaggerError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        PodtaggerError::Network(format!("model provider HTTP {status}: {detail}"))
    } else {
        PodtaggerError::Enrichment(format!("model provider HTTP {status}: {detail}"))
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Reply decoding
// ---------------------------------------------------------------------------

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````), if any.
pub fn strip_code_fence(reply: &str) -> &str {
    let mut text = reply.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Decode a JSON reply (code fence tolerated) into `T`. Anything else is a parse error.
pub fn decode_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T> {
    let body = strip_code_fence(reply);
    serde_json::from_str(body).map_err(|e| {
        PodtaggerError::parse(format!(
            "model reply is not the expected JSON: {e} (got: {})",
            &body[..floor_char_boundary(body, 200)]
        ))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
