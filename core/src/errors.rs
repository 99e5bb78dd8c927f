use thiserror::Error;

use crate::capabilities::Feature;

#[derive(Debug, Error)]
pub enum QuillError {
    #[error("{0} is not available on this device")]
    CapabilityAbsent(Feature),
    #[error("{0}")]
    Timeout(String),
    #[error("{0} returned empty output")]
    EmptyOutput(Feature),
    #[error("{feature} failed: {message}")]
    CapabilityFailed { feature: Feature, message: String },
    #[error("On-device {feature} failed ({source}). Enable cloud fallback in settings to use the cloud model when on-device processing fails.")]
    OnDeviceFailed {
        feature: Feature,
        #[source]
        source: Box<QuillError>,
    },
    #[error("Missing cloud API key")]
    CloudMissingKey,
    #[error("Cloud HTTP {0}")]
    CloudHttp(u16),
    #[error("Empty response from cloud model")]
    CloudEmptyResponse,
    #[error("Cloud request failed: {0}")]
    CloudTransport(String),
    #[error("Structured output is not valid JSON: {0}")]
    StructuredParse(String),
    #[error("Settings store unavailable: {0}")]
    Settings(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl QuillError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CapabilityAbsent(_) => "CAP-1000",
            Self::Timeout(_) => "CAP-1001",
            Self::CapabilityFailed { .. } => "CAP-1002",
            Self::OnDeviceFailed { .. } => "CAP-1003",
            Self::Provider(_) => "CAP-1004",
            Self::EmptyOutput(_) => "CAP-1005",
            Self::CloudMissingKey => "CLD-1001",
            Self::CloudHttp(_) => "CLD-1002",
            Self::CloudEmptyResponse => "CLD-1003",
            Self::CloudTransport(_) => "CLD-1004",
            Self::StructuredParse(_) => "OUT-1001",
            Self::Settings(_) => "CFG-1001",
            Self::UnknownAction(_) => "GEN-1001",
            Self::InvalidRequest(_) => "GEN-1002",
        }
    }

    pub fn explain(&self) -> &'static str {
        match self {
            Self::CapabilityAbsent(_) => "The on-device capability is not bound or not ready; the next tier answers.",
            Self::Timeout(_) => "An on-device call did not settle before its deadline.",
            Self::EmptyOutput(_) => "The on-device capability answered with no text; the next tier answers.",
            Self::CapabilityFailed { .. } | Self::Provider(_) => {
                "The on-device provider raised an error while processing the request."
            }
            Self::OnDeviceFailed { .. } => {
                "On-device processing failed and cloud fallback is disabled, so no other tier was tried."
            }
            Self::CloudMissingKey => "Cloud fallback is enabled but no API key is configured.",
            Self::CloudHttp(_) => "The cloud generation endpoint answered with a non-success status.",
            Self::CloudEmptyResponse => "The cloud model answered without any text.",
            Self::CloudTransport(_) => "The cloud request could not be sent or its body could not be read.",
            Self::StructuredParse(_) => "The model answer was returned as raw text because it was not JSON.",
            Self::Settings(_) => "Settings could not be read or written; defaults were used.",
            Self::UnknownAction(_) => "The request named an operation this layer does not serve.",
            Self::InvalidRequest(_) => "The request body is missing a field or has the wrong shape.",
        }
    }

    /// Whether the failure came from an unbound capability rather than a
    /// failed attempt.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::CapabilityAbsent(_))
    }

    /// On-device outcomes that pass to the next tier without being surfaced.
    pub fn falls_through(&self) -> bool {
        matches!(self, Self::CapabilityAbsent(_) | Self::EmptyOutput(_))
    }
}

pub type QuillResult<T> = Result<T, QuillError>;
