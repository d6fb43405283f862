//! Cleaning stage: raw feed description → `cleaned_description`.
//!
//! Markup is always stripped locally. When a model is configured the
//! stripped text is then sent for removal of promotional and production
//! content. A model that answers badly does not block the episode: the
//! stripped text is used instead. Only a transport failure fails the episode.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use podtagger_llm::{ChatClient, ChatRequest};
use podtagger_markup::strip_markup;
use podtagger_shared::{Episode, Result};
use tracing::debug;

use crate::executor::EnrichmentStage;

/// System message for the cleaning call.
const CLEAN_INSTRUCTION: &str = "You clean podcast episode descriptions. \
Remove advertisements, sponsor reads, promotional offers, social media and \
subscription links, and production credits. Keep the summary of what the \
episode is about, in the original wording and tone. Do not add information \
and do not change any facts. Content related to the episode title matters \
most. Reply with the cleaned text only.";

/// Episode fields the cleaning task needs.
#[derive(Debug, Clone)]
pub struct CleanInput {
    pub title: String,
    pub description: String,
}

/// Result of cleaning one description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanOutput {
    pub text: String,
    /// Why the model output was not used, when the stripped text stands in.
    pub fallback: Option<String>,
}

#[derive(Debug)]
struct ModelBinding {
    client: ChatClient,
    model: String,
}

/// The cleaning stage, with or without a model.
#[derive(Debug)]
pub struct CleanStage {
    model: Option<ModelBinding>,
}

impl CleanStage {
    /// Strip markup only; no model calls.
    pub fn markup_only() -> Self {
        Self { model: None }
    }

    pub fn with_model(client: ChatClient, model: impl Into<String>) -> Self {
        Self {
            model: Some(ModelBinding {
                client,
                model: model.into(),
            }),
        }
    }

    pub fn uses_model(&self) -> bool {
        self.model.is_some()
    }

    /// Clean one description.
    pub async fn clean(&self, input: &CleanInput) -> Result<CleanOutput> {
        let stripped = strip_markup(&input.description);

        let Some(binding) = &self.model else {
            return Ok(CleanOutput {
                text: stripped,
                fallback: None,
            });
        };
        if stripped.is_empty() {
            return Ok(CleanOutput {
                text: stripped,
                fallback: None,
            });
        }

        let content = format!(
            "Clean this episode description for the episode titled '{}':\n\n{stripped}",
            input.title
        );
        let request = ChatRequest {
            model: &binding.model,
            instruction: CLEAN_INSTRUCTION,
            content: &content,
            temperature: Some(0.0),
        };

        match binding.client.complete(&request).await {
            Ok(text) => Ok(CleanOutput {
                text,
                fallback: None,
            }),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                debug!(error = %e, "model cleaning unusable, keeping stripped text");
                Ok(CleanOutput {
                    text: stripped,
                    fallback: Some(e.to_string()),
                })
            }
        }
    }
}

impl EnrichmentStage for CleanStage {
    type Input = CleanInput;
    type Output = CleanOutput;

    const NAME: &'static str = "clean";

    fn prepare(&self, episode: &Episode) -> CleanInput {
        CleanInput {
            title: episode.title.clone(),
            description: episode.description.clone(),
        }
    }

    fn enrich(
        self: Arc<Self>,
        input: CleanInput,
    ) -> impl Future<Output = Result<CleanOutput>> + Send + 'static {
        async move { self.clean(&input).await }
    }

    fn apply(&self, episode: &mut Episode, output: CleanOutput, now: DateTime<Utc>) {
        episode.cleaned_description = Some(output.text);
        episode.cleaned_at = Some(now);
    }

    fn note(&self, output: &CleanOutput) -> Option<String> {
        output
            .fallback
            .as_ref()
            .map(|reason| format!("kept stripped text: {reason}"))
    }
}
