//! On-device capability detection.
//!
//! Every feature is probed in its own task so a failing, hanging or
//! panicking binding only ever downgrades its own entry to `unavailable`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::agents::ProviderRegistry;
use crate::deadline::with_deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Summarizer,
    Translator,
    Writer,
    Rewriter,
    PromptModel,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Summarizer,
        Feature::Translator,
        Feature::Writer,
        Feature::Rewriter,
        Feature::PromptModel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Summarizer => "summarizer",
            Self::Translator => "translator",
            Self::Writer => "writer",
            Self::Rewriter => "rewriter",
            Self::PromptModel => "prompt model",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityStatus {
    Unavailable,
    Downloadable,
    Downloading,
    Available,
}

impl CapabilityStatus {
    /// Map a provider's raw availability value onto the four known states.
    /// Older runtimes answer `readily` / `after-download` / `no`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "available" | "readily" => Self::Available,
            "downloadable" | "after-download" => Self::Downloadable,
            "downloading" => Self::Downloading,
            _ => Self::Unavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessPolicy {
    /// Models that still need downloading count as usable; the download
    /// happens inside the acquisition deadline.
    Lenient,
    /// Only fully available models are used.
    #[default]
    Strict,
}

impl ReadinessPolicy {
    pub fn is_usable(self, status: CapabilityStatus) -> bool {
        match self {
            Self::Lenient => status != CapabilityStatus::Unavailable,
            Self::Strict => status == CapabilityStatus::Available,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub status: CapabilityStatus,
    pub usable: bool,
}

impl Readiness {
    fn under(policy: ReadinessPolicy, status: CapabilityStatus) -> Self {
        Self {
            status,
            usable: policy.is_usable(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityReport {
    pub policy: ReadinessPolicy,
    pub summarizer: Readiness,
    pub translator: Readiness,
    pub writer: Readiness,
    pub rewriter: Readiness,
    pub prompt_model: Readiness,
}

impl CapabilityReport {
    fn from_statuses(policy: ReadinessPolicy, statuses: [CapabilityStatus; 5]) -> Self {
        let [summarizer, translator, writer, rewriter, prompt_model] =
            statuses.map(|status| Readiness::under(policy, status));
        Self {
            policy,
            summarizer,
            translator,
            writer,
            rewriter,
            prompt_model,
        }
    }

    pub fn get(&self, feature: Feature) -> Readiness {
        match feature {
            Feature::Summarizer => self.summarizer,
            Feature::Translator => self.translator,
            Feature::Writer => self.writer,
            Feature::Rewriter => self.rewriter,
            Feature::PromptModel => self.prompt_model,
        }
    }

    pub fn usable_features(&self) -> Vec<Feature> {
        Feature::ALL
            .into_iter()
            .filter(|feature| self.get(*feature).usable)
            .collect()
    }
}

/// Probe all five features concurrently and aggregate the verdicts.
pub async fn detect(
    registry: &Arc<dyn ProviderRegistry>,
    policy: ReadinessPolicy,
    probe_deadline: Duration,
) -> CapabilityReport {
    let handles = Feature::ALL.map(|feature| {
        let registry = Arc::clone(registry);
        tokio::spawn(async move { probe(registry.as_ref(), feature, probe_deadline).await })
    });

    let mut statuses = [CapabilityStatus::Unavailable; 5];
    for (slot, (feature, handle)) in Feature::ALL.into_iter().zip(handles).enumerate() {
        statuses[slot] = match handle.await {
            Ok(status) => status,
            Err(err) => {
                warn!("{feature} probe aborted: {err}");
                CapabilityStatus::Unavailable
            }
        };
    }

    let report = CapabilityReport::from_statuses(policy, statuses);
    debug!("capabilities under {policy:?} policy: {:?}", report.usable_features());
    report
}

/// Probe a single feature, isolated the same way as [`detect`].
pub async fn readiness(
    registry: &Arc<dyn ProviderRegistry>,
    feature: Feature,
    policy: ReadinessPolicy,
    probe_deadline: Duration,
) -> Readiness {
    let registry = Arc::clone(registry);
    let status =
        match tokio::spawn(async move { probe(registry.as_ref(), feature, probe_deadline).await })
            .await
        {
            Ok(status) => status,
            Err(err) => {
                warn!("{feature} probe aborted: {err}");
                CapabilityStatus::Unavailable
            }
        };
    Readiness::under(policy, status)
}

async fn probe(
    registry: &dyn ProviderRegistry,
    feature: Feature,
    limit: Duration,
) -> CapabilityStatus {
    let message = format!("{feature} availability probe timed out");
    match with_deadline(registry.availability(feature), limit, message).await {
        Ok(Some(raw)) => CapabilityStatus::normalize(&raw),
        Ok(None) => {
            debug!("{feature} is not bound");
            CapabilityStatus::Unavailable
        }
        Err(err) => {
            warn!("{feature} availability probe failed: {err}");
            CapabilityStatus::Unavailable
        }
    }
}
