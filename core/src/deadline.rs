//! Deadline-bounded provider calls and scoped provider sessions.
//!
//! Provider sessions are released on every exit path: explicit
//! [`ScopedSession::release`], drop (error, timeout, caller cancellation),
//! and an abandoned acquisition (deadline or cancelled caller), where a
//! session that shows up late is destroyed as soon as it arrives.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::task::{JoinError, JoinHandle};

use crate::agents::{ProviderRegistry, SessionRequest, TextSession};
use crate::capabilities::Feature;
use crate::errors::{QuillError, QuillResult};

pub const DEFAULT_PROBE_DEADLINE: Duration = Duration::from_secs(5);
pub const DEFAULT_ACQUISITION_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_EXECUTION_DEADLINE: Duration = Duration::from_secs(30);
pub const DEFAULT_RELEASE_DEADLINE: Duration = Duration::from_secs(2);

/// Bounds for one on-device attempt. A surfaced on-device failure returns
/// within `acquisition + execution` plus a slack of at most two availability
/// checks (the feature check and, for translation, the language pair check)
/// and one `release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Per-feature availability probe.
    pub probe: Duration,
    /// Provider session construction.
    pub acquisition: Duration,
    /// The text operation itself.
    pub execution: Duration,
    /// Waiting for a session to be destroyed.
    pub release: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            probe: DEFAULT_PROBE_DEADLINE,
            acquisition: DEFAULT_ACQUISITION_DEADLINE,
            execution: DEFAULT_EXECUTION_DEADLINE,
            release: DEFAULT_RELEASE_DEADLINE,
        }
    }
}

/// Resolve to the operation's result, or to [`QuillError::Timeout`] carrying
/// `message` if `limit` elapses first.
pub async fn with_deadline<T, F>(
    operation: F,
    limit: Duration,
    message: impl Into<String>,
) -> QuillResult<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result.map_err(QuillError::from),
        Err(_) => Err(QuillError::Timeout(message.into())),
    }
}

/// A provider session that is destroyed whichever way the caller leaves.
pub struct ScopedSession {
    feature: Feature,
    session: Option<Box<dyn TextSession>>,
}

type Construction = JoinHandle<anyhow::Result<Box<dyn TextSession>>>;

/// Session construction still in flight. Dropping it before it settles
/// (deadline or caller cancellation) leaves a reaper that destroys the
/// session once it arrives.
struct PendingSession {
    feature: Feature,
    handle: Option<Construction>,
}

impl PendingSession {
    fn spawn(registry: Arc<dyn ProviderRegistry>, request: SessionRequest) -> Self {
        let feature = request.feature();
        let handle = tokio::spawn(async move { request.open(registry.as_ref()).await });
        Self {
            feature,
            handle: Some(handle),
        }
    }

    /// `None` when `limit` elapsed first; the construction stays armed.
    async fn settle(
        &mut self,
        limit: Duration,
    ) -> Option<Result<anyhow::Result<Box<dyn TextSession>>, JoinError>> {
        let handle = self.handle.as_mut()?;
        let settled = tokio::time::timeout(limit, handle).await.ok()?;
        self.handle = None;
        Some(settled)
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let feature = self.feature;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Ok(Ok(session)) = handle.await {
                        debug!("destroying {feature} session that arrived after its caller left");
                        session.destroy().await;
                    }
                });
            }
            Err(_) => warn!("{feature} construction abandoned outside a runtime"),
        }
    }
}

impl ScopedSession {
    /// Construct a session under the acquisition deadline.
    pub async fn acquire(
        registry: Arc<dyn ProviderRegistry>,
        request: SessionRequest,
        limit: Duration,
    ) -> QuillResult<Self> {
        let feature = request.feature();
        let mut pending = PendingSession::spawn(registry, request);

        match pending.settle(limit).await {
            Some(Ok(Ok(session))) => Ok(Self {
                feature,
                session: Some(session),
            }),
            Some(Ok(Err(err))) => Err(QuillError::CapabilityFailed {
                feature,
                message: format!("{err:#}"),
            }),
            Some(Err(err)) => Err(QuillError::CapabilityFailed {
                feature,
                message: format!("session construction aborted: {err}"),
            }),
            None => Err(QuillError::Timeout(format!(
                "Timed out creating the {feature} session after {}s",
                limit.as_secs_f32()
            ))),
        }
    }

    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// Run the text operation under the execution deadline.
    pub async fn run(&self, input: &str, limit: Duration) -> QuillResult<String> {
        let feature = self.feature;
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| QuillError::CapabilityFailed {
                feature,
                message: "session already released".into(),
            })?;
        let message = format!(
            "The {feature} did not answer within {}s",
            limit.as_secs_f32()
        );
        with_deadline(session.run(input), limit, message)
            .await
            .map_err(|err| match err {
                QuillError::Provider(inner) => QuillError::CapabilityFailed {
                    feature,
                    message: format!("{inner:#}"),
                },
                other => other,
            })
    }

    /// Destroy the session, waiting at most `limit`. A destroy that takes
    /// longer keeps running detached.
    pub async fn release(mut self, limit: Duration) {
        let Some(session) = self.session.take() else {
            return;
        };
        let feature = self.feature;
        let destroy = tokio::spawn(async move { session.destroy().await });
        if tokio::time::timeout(limit, destroy).await.is_err() {
            warn!(
                "{feature} session still releasing after {}s, continuing without it",
                limit.as_secs_f32()
            );
        }
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { session.destroy().await });
            }
            Err(_) => warn!(
                "{} session dropped outside a runtime and was not destroyed",
                self.feature
            ),
        }
    }
}
