//! Text operations with tiered fallback: on-device, then cloud, then stub.
//!
//! Every operation runs the same skeleton. Settings are read fresh, the
//! on-device capability is probed and attempted when usable, and the cloud
//! tier runs when enabled. The stub answers last. The one surfaced failure
//! is an on-device failure while cloud fallback is disabled; cloud failures
//! are always swallowed.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::spawn_blocking;

use crate::agents::adapters::{self, DEFAULT_READING_LEVEL, STRUCTURED_SYSTEM_PROMPT};
use crate::agents::{CloudGenerator, CloudRequest, ProviderRegistry, SessionRequest};
use crate::capabilities::{self, CapabilityReport, ReadinessPolicy};
use crate::db::DbPool;
use crate::deadline::Deadlines;
use crate::envelope::{Envelope, Source};
use crate::errors::QuillError;
use crate::logging::{fingerprint, log_event, RUNTIME_MODULE};
use crate::settings::{Settings, SettingsStore};
use crate::stub;

const SUMMARIZE_SYSTEM: &str =
    "Summarize the following text into a concise TL;DR with 3-5 bullet points.";
const PROOFREAD_SYSTEM: &str = "Proofread and correct grammar and spelling. Preserve meaning and tone. Return only the corrected text, no explanations, no notes.";
const WRITE_SYSTEM: &str = "Write an original response that is helpful and engaging.";
const DEFAULT_REWRITE_STYLE: &str = "clear and concise";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Summarize,
    Translate,
    Proofread,
    Rewrite,
    Write,
    PromptStructured,
    Simplify,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::Summarize,
        Operation::Translate,
        Operation::Proofread,
        Operation::Rewrite,
        Operation::Write,
        Operation::PromptStructured,
        Operation::Simplify,
    ];

    /// Name used for the `action` field of a request.
    pub fn action(self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Translate => "translate",
            Self::Proofread => "proofread",
            Self::Rewrite => "rewrite",
            Self::Write => "write",
            Self::PromptStructured => "promptStructured",
            Self::Simplify => "simplify",
        }
    }

    fn from_action(action: &str) -> Option<Self> {
        if action == "prompt" {
            return Some(Self::PromptStructured);
        }
        Self::ALL.into_iter().find(|op| op.action() == action)
    }
}

/// Operation request as a host message, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OperationRequest {
    Summarize {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_sentences: Option<usize>,
    },
    Translate {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_lang: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_lang: Option<String>,
    },
    Proofread {
        text: String,
    },
    Rewrite {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        style: Option<String>,
    },
    Write {
        #[serde(alias = "text")]
        prompt: String,
    },
    #[serde(alias = "prompt")]
    PromptStructured {
        #[serde(alias = "text", alias = "prompt")]
        prompt_text: String,
    },
    Simplify {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reading_level: Option<String>,
    },
}

impl OperationRequest {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Summarize { .. } => Operation::Summarize,
            Self::Translate { .. } => Operation::Translate,
            Self::Proofread { .. } => Operation::Proofread,
            Self::Rewrite { .. } => Operation::Rewrite,
            Self::Write { .. } => Operation::Write,
            Self::PromptStructured { .. } => Operation::PromptStructured,
            Self::Simplify { .. } => Operation::Simplify,
        }
    }
}

/// Everything that varies between operations.
struct Plan {
    operation: Operation,
    request: SessionRequest,
    input: String,
    system: String,
    structured: bool,
    stub: Value,
}

/// Entry point for hosts: one instance serves any number of concurrent calls.
#[derive(Clone)]
pub struct TextOps {
    registry: Arc<dyn ProviderRegistry>,
    cloud: Arc<dyn CloudGenerator>,
    settings: Arc<dyn SettingsStore>,
    policy: ReadinessPolicy,
    deadlines: Deadlines,
    journal: Option<DbPool>,
}

impl TextOps {
    pub fn new(
        registry: Arc<dyn ProviderRegistry>,
        cloud: Arc<dyn CloudGenerator>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            registry,
            cloud,
            settings,
            policy: ReadinessPolicy::default(),
            deadlines: Deadlines::default(),
            journal: None,
        }
    }

    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_deadlines(mut self, deadlines: Deadlines) -> Self {
        self.deadlines = deadlines;
        self
    }

    /// Record tier decisions in the `event_log` table of `pool`.
    pub fn with_journal(mut self, pool: DbPool) -> Self {
        self.journal = Some(pool);
        self
    }

    pub fn policy(&self) -> ReadinessPolicy {
        self.policy
    }

    pub fn deadlines(&self) -> Deadlines {
        self.deadlines
    }

    pub fn settings_store(&self) -> Arc<dyn SettingsStore> {
        Arc::clone(&self.settings)
    }

    pub async fn summarize(&self, text: &str, max_sentences: Option<usize>) -> Envelope {
        let settings = self.load_settings().await;
        let max = max_sentences
            .filter(|n| *n > 0)
            .unwrap_or(settings.max_summary_sentences);
        let plan = Plan {
            operation: Operation::Summarize,
            request: SessionRequest::Summarizer(adapters::summarizer_options()),
            input: text.to_string(),
            system: SUMMARIZE_SYSTEM.to_string(),
            structured: false,
            stub: stub::summarize(text, max).into(),
        };
        self.execute(plan, settings).await
    }

    pub async fn translate(
        &self,
        text: &str,
        target_lang: Option<&str>,
        source_lang: Option<&str>,
    ) -> Envelope {
        let settings = self.load_settings().await;
        let options = adapters::translator_options(target_lang, source_lang, &settings);
        let plan = Plan {
            operation: Operation::Translate,
            system: format!(
                "Translate the text into {}. Respond with only the translation.",
                options.target_language
            ),
            request: SessionRequest::Translator(options),
            input: text.to_string(),
            structured: false,
            stub: stub::identity(text).into(),
        };
        self.execute(plan, settings).await
    }

    pub async fn proofread(&self, text: &str) -> Envelope {
        let settings = self.load_settings().await;
        let plan = Plan {
            operation: Operation::Proofread,
            request: SessionRequest::Writer(adapters::proofreader_options()),
            input: text.to_string(),
            system: PROOFREAD_SYSTEM.to_string(),
            structured: false,
            stub: stub::identity(text).into(),
        };
        self.execute(plan, settings).await
    }

    pub async fn rewrite(&self, text: &str, style: Option<&str>) -> Envelope {
        let settings = self.load_settings().await;
        let cloud_style = style
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_REWRITE_STYLE);
        let plan = Plan {
            operation: Operation::Rewrite,
            request: SessionRequest::Rewriter(adapters::rewriter_options(style)),
            input: text.to_string(),
            system: format!(
                "Rewrite in a {cloud_style} style. Return only the rewritten text. No explanations or commentary."
            ),
            structured: false,
            stub: stub::identity(text).into(),
        };
        self.execute(plan, settings).await
    }

    pub async fn write(&self, prompt: &str) -> Envelope {
        let settings = self.load_settings().await;
        let plan = Plan {
            operation: Operation::Write,
            request: SessionRequest::Writer(adapters::writer_options()),
            input: prompt.to_string(),
            system: WRITE_SYSTEM.to_string(),
            structured: false,
            stub: stub::write(prompt).into(),
        };
        self.execute(plan, settings).await
    }

    /// Structured answer: JSON when the model answers with JSON, the raw text
    /// otherwise.
    pub async fn prompt_structured(&self, prompt_text: &str) -> Envelope {
        let settings = self.load_settings().await;
        let plan = Plan {
            operation: Operation::PromptStructured,
            request: SessionRequest::PromptModel(adapters::prompt_options(&settings)),
            input: prompt_text.to_string(),
            system: STRUCTURED_SYSTEM_PROMPT.to_string(),
            structured: true,
            stub: stub::structured(prompt_text),
        };
        self.execute(plan, settings).await
    }

    pub async fn simplify(&self, text: &str, reading_level: Option<&str>) -> Envelope {
        let settings = self.load_settings().await;
        let level = reading_level
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_READING_LEVEL);
        let plan = Plan {
            operation: Operation::Simplify,
            request: SessionRequest::Writer(adapters::simplifier_options(level)),
            input: text.to_string(),
            system: format!(
                "Rewrite this text at a {level} reading level. Use simple words and short sentences. Preserve all key information. Return only the simplified text."
            ),
            structured: false,
            stub: stub::identity(text).into(),
        };
        self.execute(plan, settings).await
    }

    pub async fn detect_capabilities(&self) -> CapabilityReport {
        capabilities::detect(&self.registry, self.policy, self.deadlines.probe).await
    }

    pub async fn dispatch(&self, request: OperationRequest) -> Envelope {
        match request {
            OperationRequest::Summarize {
                text,
                max_sentences,
            } => self.summarize(&text, max_sentences).await,
            OperationRequest::Translate {
                text,
                target_lang,
                source_lang,
            } => {
                self.translate(&text, target_lang.as_deref(), source_lang.as_deref())
                    .await
            }
            OperationRequest::Proofread { text } => self.proofread(&text).await,
            OperationRequest::Rewrite { text, style } => {
                self.rewrite(&text, style.as_deref()).await
            }
            OperationRequest::Write { prompt } => self.write(&prompt).await,
            OperationRequest::PromptStructured { prompt_text } => {
                self.prompt_structured(&prompt_text).await
            }
            OperationRequest::Simplify {
                text,
                reading_level,
            } => self.simplify(&text, reading_level.as_deref()).await,
        }
    }

    /// Decode a host message and run it. Malformed messages become error
    /// envelopes.
    pub async fn dispatch_json(&self, message: Value) -> Envelope {
        match parse_request(message) {
            Ok(request) => self.dispatch(request).await,
            Err(err) => {
                warn!("rejected request: {err}");
                Envelope::failure(&err)
            }
        }
    }

    async fn load_settings(&self) -> Settings {
        match self.settings.get().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!("settings read failed, using defaults: {err}");
                self.journal(
                    "warn",
                    err.code(),
                    "Settings read failed",
                    err.explain(),
                    json!({ "error": err.to_string() }),
                )
                .await;
                Settings::default()
            }
        }
    }

    async fn execute(&self, plan: Plan, settings: Settings) -> Envelope {
        let Plan {
            operation,
            request,
            input,
            system,
            structured,
            stub,
        } = plan;
        let feature = request.feature();
        let action = operation.action();

        let readiness =
            capabilities::readiness(&self.registry, feature, self.policy, self.deadlines.probe)
                .await;
        if readiness.usable {
            debug!("{action}: attempting on-device {feature}");
            match adapters::attempt(&self.registry, request, &input, &self.deadlines, self.policy)
                .await
            {
                Ok(text) => {
                    let data = shape_output(text, structured);
                    return self.answered(operation, Source::Builtin, &input, data).await;
                }
                Err(err) if err.falls_through() => {
                    debug!("{action}: {err}, skipping on-device tier");
                }
                Err(err) if !settings.use_cloud_fallback => {
                    let err = QuillError::OnDeviceFailed {
                        feature,
                        source: Box::new(err),
                    };
                    warn!("{action}: {err}");
                    self.journal_failure(operation, "error", &err, &input).await;
                    return Envelope::failure(&err);
                }
                Err(err) => {
                    warn!("{action}: on-device {feature} failed, trying cloud: {err}");
                    self.journal_failure(operation, "warn", &err, &input).await;
                }
            }
        } else {
            debug!("{action}: {feature} not usable ({:?})", readiness.status);
        }

        if settings.use_cloud_fallback {
            let request = CloudRequest {
                model: &settings.cloud_model,
                api_key: &settings.cloud_api_key,
                system: Some(system.as_str()),
                input: &input,
            };
            match self.cloud.generate(&request).await {
                Ok(text) => {
                    let data = shape_output(text, structured);
                    return self.answered(operation, Source::Cloud, &input, data).await;
                }
                Err(err) => {
                    warn!("{action}: cloud tier failed, using stub: {err}");
                    self.journal_failure(operation, "warn", &err, &input).await;
                }
            }
        }

        self.answered(operation, Source::Stub, &input, stub).await
    }

    async fn answered(
        &self,
        operation: Operation,
        source: Source,
        input: &str,
        data: Value,
    ) -> Envelope {
        info!("{} answered by {} tier", operation.action(), source.label());
        self.journal(
            "info",
            "RUN-0200",
            "Operation answered",
            "The tier named in the payload produced the result.",
            json!({
                "operation": operation.action(),
                "tier": source,
                "inputLength": input.chars().count(),
                "fingerprint": fingerprint(input),
            }),
        )
        .await;
        Envelope::success(source, data)
    }

    async fn journal_failure(&self, operation: Operation, level: &str, err: &QuillError, input: &str) {
        self.journal(
            level,
            err.code(),
            &err.to_string(),
            err.explain(),
            json!({
                "operation": operation.action(),
                "inputLength": input.chars().count(),
                "fingerprint": fingerprint(input),
            }),
        )
        .await;
    }

    async fn journal(&self, level: &str, code: &str, message: &str, explain: &str, data: Value) {
        let Some(pool) = self.journal.clone() else {
            return;
        };
        let level = level.to_string();
        let code = code.to_string();
        let message = message.to_string();
        let explain = explain.to_string();
        let written = spawn_blocking(move || -> anyhow::Result<()> {
            let conn = pool.get()?;
            log_event(
                &conn,
                &level,
                Some(&code),
                RUNTIME_MODULE,
                &message,
                Some(&explain),
                Some(data),
            )?;
            Ok(())
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("failed to write journal entry: {err:#}"),
            Err(err) => warn!("journal task failed: {err}"),
        }
    }
}

fn parse_request(message: Value) -> Result<OperationRequest, QuillError> {
    let action = message
        .get("action")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| QuillError::InvalidRequest("missing \"action\"".into()))?;
    if Operation::from_action(&action).is_none() {
        return Err(QuillError::UnknownAction(action));
    }
    serde_json::from_value(message).map_err(|err| QuillError::InvalidRequest(err.to_string()))
}

/// Parse structured answers, keeping the raw text when they are not JSON.
fn shape_output(text: String, structured: bool) -> Value {
    if !structured {
        return Value::String(text);
    }
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => {
            let err = QuillError::StructuredParse(err.to_string());
            debug!("{} ({}), returning raw text", err, err.code());
            Value::String(text)
        }
    }
}
