use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{QuillError, QuillResult};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone, Copy)]
pub struct CloudRequest<'a> {
    pub model: &'a str,
    pub api_key: &'a str,
    pub system: Option<&'a str>,
    pub input: &'a str,
}

/// Remote generation tier. Implementations never panic or raise past this
/// boundary; every failure is a [`QuillError`] value.
#[async_trait]
pub trait CloudGenerator: Send + Sync {
    async fn generate(&self, request: &CloudRequest<'_>) -> QuillResult<String>;
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Default, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

pub struct GeminiClient {
    client: Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(45))
            .user_agent("Quill-Core/0.1")
            .build()
            .context("failed to construct HTTP client")?;
        Ok(Self {
            client,
            base_url: DEFAULT_ENDPOINT.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn endpoint(&self, model: &str) -> String {
        format!("{}/{}:generateContent", self.base_url.trim_end_matches('/'), model)
    }
}

#[async_trait]
impl CloudGenerator for GeminiClient {
    async fn generate(&self, request: &CloudRequest<'_>) -> QuillResult<String> {
        if request.api_key.trim().is_empty() {
            return Err(QuillError::CloudMissingKey);
        }

        let response = self
            .client
            .post(self.endpoint(request.model))
            .query(&[("key", request.api_key)])
            .json(&build_body(request.system, request.input))
            .send()
            .await
            .map_err(|err| QuillError::CloudTransport(err.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuillError::CloudHttp(status.as_u16()));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|err| QuillError::CloudTransport(err.without_url().to_string()))?;
        let text = extract_text(&body);
        if text.is_empty() {
            return Err(QuillError::CloudEmptyResponse);
        }
        Ok(text)
    }
}

/// Request body: an optional system turn followed by the input turn.
pub fn build_body(system: Option<&str>, input: &str) -> Value {
    let mut contents = Vec::new();
    if let Some(system) = system.filter(|s| !s.is_empty()) {
        contents.push(json!({ "role": "user", "parts": [{ "text": system }] }));
    }
    contents.push(json!({ "role": "user", "parts": [{ "text": input }] }));
    json!({ "contents": contents })
}

fn extract_text(body: &GenerateResponse) -> String {
    body.candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
