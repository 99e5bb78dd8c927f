//! Mapping from abstract operation parameters onto on-device construction
//! options, plus a single deadline-bounded attempt against the registry.

use std::sync::Arc;

use log::debug;

use super::registry::{
    PromptOptions, ProviderRegistry, RewriteLength, RewriteTone, RewriterOptions, SessionRequest,
    SummarizerOptions, SummaryKind, SummaryLength, TextFormat, TranslatorOptions, WriterOptions,
    WriterTone,
};
use crate::capabilities::{CapabilityStatus, Feature, ReadinessPolicy};
use crate::deadline::{with_deadline, Deadlines, ScopedSession};
use crate::errors::{QuillError, QuillResult};
use crate::settings::Settings;

pub const DEFAULT_SOURCE_LANG: &str = "en";
pub const DEFAULT_READING_LEVEL: &str = "grade 6";
pub const STRUCTURED_SYSTEM_PROMPT: &str =
    "Respond in JSON only. If not structured, infer a reasonable JSON structure.";
const PROMPT_LANGUAGES: [&str; 3] = ["en", "es", "ja"];

const PROOFREAD_CONTEXT: &str = "Proofread and correct grammar and spelling. Preserve meaning and tone. Return only the corrected text with no explanations.";

pub fn summarizer_options() -> SummarizerOptions {
    SummarizerOptions {
        kind: SummaryKind::KeyPoints,
        format: TextFormat::PlainText,
        length: SummaryLength::Medium,
    }
}

/// Concrete language pair for the translator; no "auto" source exists on
/// device.
pub fn translator_options(
    target_lang: Option<&str>,
    source_lang: Option<&str>,
    settings: &Settings,
) -> TranslatorOptions {
    let target = non_empty(target_lang)
        .or_else(|| non_empty(Some(settings.default_target_lang.as_str())))
        .unwrap_or("en");
    let source = non_empty(source_lang).unwrap_or(DEFAULT_SOURCE_LANG);
    TranslatorOptions {
        source_language: source.to_string(),
        target_language: target.to_string(),
    }
}

pub fn proofreader_options() -> WriterOptions {
    WriterOptions {
        tone: WriterTone::Neutral,
        format: TextFormat::PlainText,
        shared_context: Some(PROOFREAD_CONTEXT.to_string()),
    }
}

pub fn writer_options() -> WriterOptions {
    WriterOptions {
        tone: WriterTone::Neutral,
        format: TextFormat::PlainText,
        shared_context: None,
    }
}

pub fn simplifier_options(reading_level: &str) -> WriterOptions {
    WriterOptions {
        tone: WriterTone::Neutral,
        format: TextFormat::PlainText,
        shared_context: Some(format!(
            "Rewrite this text at a {reading_level} reading level. Use simple words and short sentences. Preserve all key information. Return only the simplified text, no commentary."
        )),
    }
}

/// Map a free-text style onto rewriter tone and length. Tone is first match
/// wins; length is decided independently.
pub fn rewriter_options(style: Option<&str>) -> RewriterOptions {
    let style = style.unwrap_or_default().to_lowercase();
    let tone = if style.contains("formal") {
        RewriteTone::MoreFormal
    } else if style.contains("casual") || style.contains("friendly") {
        RewriteTone::MoreCasual
    } else {
        RewriteTone::AsIs
    };

    let mut length = None;
    if style.contains("concise") || style.contains("shorter") {
        length = Some(RewriteLength::Shorter);
    }
    if style.contains("longer") {
        length = Some(RewriteLength::Longer);
    }

    RewriterOptions {
        tone,
        format: TextFormat::PlainText,
        length,
    }
}

pub fn prompt_options(settings: &Settings) -> PromptOptions {
    let requested = settings.default_target_lang.trim().to_lowercase();
    let output_language = if PROMPT_LANGUAGES.contains(&requested.as_str()) {
        requested
    } else {
        "en".to_string()
    };
    PromptOptions {
        system_prompt: STRUCTURED_SYSTEM_PROMPT.to_string(),
        output_language,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One on-device attempt: acquire the session, run it, release it.
///
/// Returns [`QuillError::CapabilityAbsent`] when the translator cannot serve
/// the requested language pair and [`QuillError::EmptyOutput`] when the
/// session answered with nothing; every other error is a failed attempt.
pub async fn attempt(
    registry: &Arc<dyn ProviderRegistry>,
    request: SessionRequest,
    input: &str,
    deadlines: &Deadlines,
    policy: ReadinessPolicy,
) -> QuillResult<String> {
    let feature = request.feature();
    if let SessionRequest::Translator(options) = &request {
        if !pair_ready(registry.as_ref(), options, deadlines, policy).await {
            return Err(QuillError::CapabilityAbsent(feature));
        }
    }

    let session = ScopedSession::acquire(Arc::clone(registry), request, deadlines.acquisition).await?;
    let outcome = session.run(input, deadlines.execution).await;
    session.release(deadlines.release).await;

    let text = outcome?;
    if text.trim().is_empty() {
        return Err(QuillError::EmptyOutput(feature));
    }
    Ok(text)
}

async fn pair_ready(
    registry: &dyn ProviderRegistry,
    options: &TranslatorOptions,
    deadlines: &Deadlines,
    policy: ReadinessPolicy,
) -> bool {
    let source = options.source_language.as_str();
    let target = options.target_language.as_str();
    let probe = registry.translator_pair_availability(source, target);
    let status = match with_deadline(probe, deadlines.probe, "translator pair probe timed out").await {
        Ok(Some(raw)) => CapabilityStatus::normalize(&raw),
        Ok(None) => CapabilityStatus::Unavailable,
        Err(err) => {
            debug!("translator pair {source}->{target} probe failed: {err}");
            CapabilityStatus::Unavailable
        }
    };
    let ready = policy.is_usable(status);
    if !ready {
        debug!("{} cannot serve {source}->{target} ({status:?})", Feature::Translator);
    }
    ready
}
