//! Local model runtime (Ollama) bound as the on-device tier.
//!
//! Every feature is served by the same local model; the typed construction
//! options are rendered into a system instruction for it. A model that the
//! runtime knows how to fetch but has not pulled yet reports `downloadable`
//! and is pulled when a session is acquired.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::registry::{
    PromptOptions, ProviderRegistry, RewriteLength, RewriteTone, RewriterOptions,
    SummarizerOptions, SummaryKind, SummaryLength, TextFormat, TextSession, TranslatorOptions,
    WriterOptions, WriterTone,
};
use crate::capabilities::Feature;

pub const DEFAULT_URL: &str = "http://127.0.0.1:11434";

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Clone)]
pub struct OllamaRegistry {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaRegistry {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent("Quill-Core/0.1")
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    async fn model_state(&self) -> Result<&'static str> {
        let tags: TagsResponse = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let pulled = tags.models.iter().any(|m| same_model(&m.name, &self.model));
        Ok(if pulled { "available" } else { "downloadable" })
    }

    async fn pull(&self) -> Result<()> {
        debug!("pulling local model {}", self.model);
        self.client
            .post(format!("{}/api/pull", self.base_url))
            .json(&json!({ "model": self.model, "stream": false }))
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("failed to pull {}", self.model))?;
        Ok(())
    }

    async fn open(&self, system: String, json_output: bool) -> Result<Box<dyn TextSession>> {
        if self.model_state().await? != "available" {
            self.pull().await?;
        }
        Ok(Box::new(OllamaSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            system,
            json_output,
        }))
    }
}

/// `llama3.2` and `llama3.2:latest` name the same model.
fn same_model(listed: &str, wanted: &str) -> bool {
    listed == wanted || listed.strip_suffix(":latest") == Some(wanted)
}

#[async_trait]
impl ProviderRegistry for OllamaRegistry {
    async fn availability(&self, _feature: Feature) -> Result<Option<String>> {
        let state = self.model_state().await?;
        Ok(Some(state.to_string()))
    }

    async fn create_summarizer(&self, options: SummarizerOptions) -> Result<Box<dyn TextSession>> {
        self.open(summarizer_instruction(&options), false).await
    }

    async fn create_translator(&self, options: TranslatorOptions) -> Result<Box<dyn TextSession>> {
        let system = format!(
            "Translate the text from {} into {}. Respond with only the translation.",
            options.source_language, options.target_language
        );
        self.open(system, false).await
    }

    async fn create_writer(&self, options: WriterOptions) -> Result<Box<dyn TextSession>> {
        self.open(writer_instruction(&options), false).await
    }

    async fn create_rewriter(&self, options: RewriterOptions) -> Result<Box<dyn TextSession>> {
        self.open(rewriter_instruction(&options), false).await
    }

    async fn create_prompt_model(&self, options: PromptOptions) -> Result<Box<dyn TextSession>> {
        let system = format!(
            "{} Write all natural-language values in the language with code '{}'.",
            options.system_prompt, options.output_language
        );
        self.open(system, true).await
    }
}

struct OllamaSession {
    client: Client,
    base_url: String,
    model: String,
    system: String,
    json_output: bool,
}

#[async_trait]
impl TextSession for OllamaSession {
    async fn run(&self, input: &str) -> Result<String> {
        let mut payload = json!({
            "model": self.model,
            "system": self.system,
            "prompt": input,
            "stream": false,
            "options": { "temperature": 0.2 }
        });
        if self.json_output {
            payload["format"] = json!("json");
        }
        let body: GenerateResponse = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&payload)
            .send()
            .await?
            .error_for_status()
            .map_err(|err| anyhow!("local model request failed: {err}"))?
            .json()
            .await?;
        Ok(body.response)
    }

    async fn destroy(&self) {
        let unload = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&json!({ "model": self.model, "keep_alive": 0 }))
            .timeout(Duration::from_secs(2))
            .send()
            .await;
        if let Err(err) = unload {
            debug!("failed to unload {}: {err}", self.model);
        }
    }
}

fn format_clause(format: TextFormat) -> &'static str {
    match format {
        TextFormat::PlainText => "Answer in plain text without markdown.",
        TextFormat::Markdown => "Format the answer as markdown.",
    }
}

fn summarizer_instruction(options: &SummarizerOptions) -> String {
    let shape = match options.kind {
        SummaryKind::KeyPoints => "the key points of the text as a short list",
        SummaryKind::Tldr => "a TL;DR of the text",
    };
    let length = match options.length {
        SummaryLength::Short => "Keep it very short.",
        SummaryLength::Medium => "Keep it reasonably brief.",
        SummaryLength::Long => "Be thorough.",
    };
    format!("Summarize {shape}. {length} {}", format_clause(options.format))
}

fn writer_instruction(options: &WriterOptions) -> String {
    let tone = match options.tone {
        WriterTone::Formal => "formal",
        WriterTone::Neutral => "neutral",
        WriterTone::Casual => "casual",
    };
    let mut system = format!("You are a writing assistant. Use a {tone} tone.");
    if let Some(context) = &options.shared_context {
        system.push(' ');
        system.push_str(context);
    }
    system.push(' ');
    system.push_str(format_clause(options.format));
    system
}

fn rewriter_instruction(options: &RewriterOptions) -> String {
    let tone = match options.tone {
        RewriteTone::MoreFormal => "Make the tone more formal.",
        RewriteTone::AsIs => "Keep the original tone.",
        RewriteTone::MoreCasual => "Make the tone more casual.",
    };
    let length = match options.length {
        Some(RewriteLength::Shorter) => " Make it shorter.",
        Some(RewriteLength::Longer) => " Make it longer.",
        None => "",
    };
    format!(
        "Rewrite the text. {tone}{length} Return only the rewritten text. {}",
        format_clause(options.format)
    )
}
