#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use quill_core::agents::{
    CloudGenerator, CloudRequest, PromptOptions, ProviderRegistry, RewriterOptions,
    SummarizerOptions, TextSession, TranslatorOptions, WriterOptions,
};
use quill_core::{
    Feature, MemorySettingsStore, QuillError, QuillResult, Settings, SettingsPatch, SettingsStore,
    TextOps,
};

/// What a fake on-device session does when run.
#[derive(Clone)]
pub enum Behavior {
    Answer(String),
    Fail(String),
    Hang,
}

#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub runs: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// Registry double: fixed statuses per feature, one behaviour for every
/// session, optionally a construction that never finishes.
pub struct FakeRegistry {
    statuses: HashMap<Feature, String>,
    pair_status: Option<String>,
    behavior: Behavior,
    hang_on_create: bool,
    create_delay: Option<Duration>,
    stuck_destroy: bool,
    hang_availability: bool,
    pub counters: Arc<Counters>,
}

impl FakeRegistry {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            statuses: HashMap::new(),
            pair_status: None,
            behavior,
            hang_on_create: false,
            create_delay: None,
            stuck_destroy: false,
            hang_availability: false,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_status(mut self, feature: Feature, status: &str) -> Self {
        self.statuses.insert(feature, status.to_string());
        self
    }

    pub fn all_available(mut self) -> Self {
        for feature in Feature::ALL {
            self.statuses.insert(feature, "available".into());
        }
        self
    }

    pub fn with_pair_status(mut self, status: &str) -> Self {
        self.pair_status = Some(status.to_string());
        self
    }

    pub fn hanging_on_create(mut self) -> Self {
        self.hang_on_create = true;
        self
    }

    /// Sessions take `delay` to construct.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Sessions never finish destroying.
    pub fn with_stuck_destroy(mut self) -> Self {
        self.stuck_destroy = true;
        self
    }

    /// Availability queries never answer.
    pub fn hanging_availability(mut self) -> Self {
        self.hang_availability = true;
        self
    }

    async fn open(&self) -> Result<Box<dyn TextSession>> {
        if self.hang_on_create {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            behavior: self.behavior.clone(),
            stuck_destroy: self.stuck_destroy,
            counters: Arc::clone(&self.counters),
        }))
    }
}

#[async_trait]
impl ProviderRegistry for FakeRegistry {
    async fn availability(&self, feature: Feature) -> Result<Option<String>> {
        if self.hang_availability {
            std::future::pending::<()>().await;
        }
        Ok(self.statuses.get(&feature).cloned())
    }

    async fn translator_pair_availability(
        &self,
        _source: &str,
        _target: &str,
    ) -> Result<Option<String>> {
        match &self.pair_status {
            Some(status) => Ok(Some(status.clone())),
            None => self.availability(Feature::Translator).await,
        }
    }

    async fn create_summarizer(&self, _options: SummarizerOptions) -> Result<Box<dyn TextSession>> {
        self.open().await
    }

    async fn create_translator(&self, _options: TranslatorOptions) -> Result<Box<dyn TextSession>> {
        self.open().await
    }

    async fn create_writer(&self, _options: WriterOptions) -> Result<Box<dyn TextSession>> {
        self.open().await
    }

    async fn create_rewriter(&self, _options: RewriterOptions) -> Result<Box<dyn TextSession>> {
        self.open().await
    }

    async fn create_prompt_model(&self, _options: PromptOptions) -> Result<Box<dyn TextSession>> {
        self.open().await
    }
}

struct FakeSession {
    behavior: Behavior,
    stuck_destroy: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl TextSession for FakeSession {
    async fn run(&self, _input: &str) -> Result<String> {
        self.counters.runs.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Answer(text) => Ok(text.clone()),
            Behavior::Fail(message) => Err(anyhow!(message.clone())),
            Behavior::Hang => std::future::pending().await,
        }
    }

    async fn destroy(&self) {
        if self.stuck_destroy {
            std::future::pending::<()>().await;
        }
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Cloud double recording the system instruction of every call.
pub struct FakeCloud {
    answer: Option<String>,
    pub systems: Mutex<Vec<String>>,
}

impl FakeCloud {
    pub fn answering(text: &str) -> Self {
        Self {
            answer: Some(text.to_string()),
            systems: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            systems: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.systems.lock().unwrap().len()
    }
}

#[async_trait]
impl CloudGenerator for FakeCloud {
    async fn generate(&self, request: &CloudRequest<'_>) -> QuillResult<String> {
        self.systems
            .lock()
            .unwrap()
            .push(request.system.unwrap_or_default().to_string());
        if request.api_key.is_empty() {
            return Err(QuillError::CloudMissingKey);
        }
        self.answer.clone().ok_or(QuillError::CloudHttp(503))
    }
}

/// Store whose reads always fail.
pub struct BrokenSettings;

#[async_trait]
impl SettingsStore for BrokenSettings {
    async fn get(&self) -> QuillResult<Settings> {
        Err(QuillError::Settings("disk on fire".into()))
    }

    async fn set(&self, _patch: SettingsPatch) -> QuillResult<()> {
        Err(QuillError::Settings("disk on fire".into()))
    }
}

pub fn cloud_settings() -> Settings {
    Settings {
        use_cloud_fallback: true,
        cloud_api_key: "test-key".into(),
        ..Settings::default()
    }
}

pub fn ops(
    registry: Arc<dyn ProviderRegistry>,
    cloud: Arc<dyn CloudGenerator>,
    settings: Settings,
) -> TextOps {
    TextOps::new(registry, cloud, Arc::new(MemorySettingsStore::new(settings)))
}
