//! Uniform result shape returned by every operation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::QuillError;

/// Tier that produced an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Builtin,
    Cloud,
    Stub,
    Error,
}

impl Source {
    /// Short tag shown next to a result.
    pub fn label(self) -> &'static str {
        match self {
            Self::Builtin => "On-device",
            Self::Cloud => "Cloud",
            Self::Stub => "Local",
            Self::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub source: Source,
}

/// `ok` implies `data` and no `error`; a failure carries `error`, no `data`
/// and `source = error`. The constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    meta: Meta,
}

impl Envelope {
    pub fn success(source: Source, data: impl Into<Value>) -> Self {
        debug_assert!(source != Source::Error, "successful envelope tagged as error");
        Self {
            ok: true,
            data: Some(data.into()),
            error: None,
            meta: Meta { source },
        }
    }

    pub fn failure(err: &QuillError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.to_string()),
            meta: Meta {
                source: Source::Error,
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn source(&self) -> Source {
        self.meta.source
    }

    /// Text payload, when the data is a JSON string.
    pub fn text(&self) -> Option<&str> {
        self.data.as_ref().and_then(Value::as_str)
    }

    pub fn into_data(self) -> Option<Value> {
        self.data
    }
}
