//! Core library for Quill, a tiered text assistant.
//!
//! Each request is answered by an on-device model when one is bound and
//! ready, otherwise by a cloud model when the user enabled it, otherwise by a
//! deterministic local stub. The modules split along those seams:
//! - [`agents`] holds the provider registry seam, the adapters that map
//!   operations onto on-device sessions, the Ollama binding and the cloud client.
//! - [`capabilities`] probes on-device features under a readiness policy.
//! - [`deadline`] bounds provider calls and guarantees session release.
//! - [`operations`] runs the shared fallback skeleton for every operation.
//! - [`settings`] is the settings port with in-memory and SQLite stores.
//! - [`db`] initialises the SQLite database and applies migrations.
//! - [`errors`] keeps the central error catalogue with human friendly metadata.
//! - [`logging`] writes structured diagnostics to the event log table.

pub mod agents;
pub mod capabilities;
pub mod db;
pub mod deadline;
pub mod envelope;
pub mod errors;
pub mod logging;
pub mod operations;
pub mod settings;
pub mod stub;

pub use capabilities::{CapabilityReport, CapabilityStatus, Feature, ReadinessPolicy};
pub use deadline::Deadlines;
pub use envelope::{Envelope, Source};
pub use errors::{QuillError, QuillResult};
pub use operations::{Operation, OperationRequest, TextOps};
pub use settings::{MemorySettingsStore, Settings, SettingsPatch, SettingsStore, SqliteSettingsStore};
