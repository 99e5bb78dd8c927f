//! Injectable seam over on-device text capabilities.
//!
//! A [`ProviderRegistry`] answers one availability query per feature and
//! constructs one [`TextSession`] per feature from typed construction
//! options. Hosts bind a concrete runtime (see [`super::ollama`]); tests bind
//! doubles; [`NullRegistry`] binds nothing.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::capabilities::Feature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextFormat {
    PlainText,
    Markdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryKind {
    KeyPoints,
    Tldr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryLength {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriterTone {
    Formal,
    Neutral,
    Casual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewriteTone {
    MoreFormal,
    AsIs,
    MoreCasual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RewriteLength {
    Shorter,
    Longer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizerOptions {
    #[serde(rename = "type")]
    pub kind: SummaryKind,
    pub format: TextFormat,
    pub length: SummaryLength,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatorOptions {
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriterOptions {
    pub tone: WriterTone,
    pub format: TextFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriterOptions {
    pub tone: RewriteTone,
    pub format: TextFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<RewriteLength>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptions {
    pub system_prompt: String,
    pub output_language: String,
}

/// A live provider session. Sessions own provider-side resources and must be
/// destroyed once the caller is done with them.
#[async_trait]
pub trait TextSession: Send + Sync {
    async fn run(&self, input: &str) -> Result<String>;

    async fn destroy(&self) {}
}

#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    /// Raw availability value for `feature`, or `None` when nothing is bound
    /// for it. Values are provider-specific strings normalised by the
    /// capability detector.
    async fn availability(&self, feature: Feature) -> Result<Option<String>>;

    /// Availability for a concrete language pair.
    async fn translator_pair_availability(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Option<String>> {
        let _ = (source, target);
        self.availability(Feature::Translator).await
    }

    async fn create_summarizer(&self, options: SummarizerOptions) -> Result<Box<dyn TextSession>> {
        let _ = options;
        Err(not_bound(Feature::Summarizer))
    }

    async fn create_translator(&self, options: TranslatorOptions) -> Result<Box<dyn TextSession>> {
        let _ = options;
        Err(not_bound(Feature::Translator))
    }

    async fn create_writer(&self, options: WriterOptions) -> Result<Box<dyn TextSession>> {
        let _ = options;
        Err(not_bound(Feature::Writer))
    }

    async fn create_rewriter(&self, options: RewriterOptions) -> Result<Box<dyn TextSession>> {
        let _ = options;
        Err(not_bound(Feature::Rewriter))
    }

    async fn create_prompt_model(&self, options: PromptOptions) -> Result<Box<dyn TextSession>> {
        let _ = options;
        Err(not_bound(Feature::PromptModel))
    }
}

fn not_bound(feature: Feature) -> anyhow::Error {
    anyhow!("{feature} is not bound in this environment")
}

/// Session construction request, one variant per capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Summarizer(SummarizerOptions),
    Translator(TranslatorOptions),
    Writer(WriterOptions),
    Rewriter(RewriterOptions),
    PromptModel(PromptOptions),
}

impl SessionRequest {
    pub fn feature(&self) -> Feature {
        match self {
            Self::Summarizer(_) => Feature::Summarizer,
            Self::Translator(_) => Feature::Translator,
            Self::Writer(_) => Feature::Writer,
            Self::Rewriter(_) => Feature::Rewriter,
            Self::PromptModel(_) => Feature::PromptModel,
        }
    }

    pub async fn open(self, registry: &dyn ProviderRegistry) -> Result<Box<dyn TextSession>> {
        match self {
            Self::Summarizer(options) => registry.create_summarizer(options).await,
            Self::Translator(options) => registry.create_translator(options).await,
            Self::Writer(options) => registry.create_writer(options).await,
            Self::Rewriter(options) => registry.create_rewriter(options).await,
            Self::PromptModel(options) => registry.create_prompt_model(options).await,
        }
    }
}

/// Environment with no on-device capabilities bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRegistry;

#[async_trait]
impl ProviderRegistry for NullRegistry {
    async fn availability(&self, _feature: Feature) -> Result<Option<String>> {
        Ok(None)
    }
}
