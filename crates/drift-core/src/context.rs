// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution context propagation.
//!
//! A [`ContextFrame`] lives from the first span of an inbound request until
//! the server span ends, and must be observable from every asynchronous
//! continuation that logically belongs to that request. The ambient current
//! frame/span pair rides a Tokio task-local; wrappers that hand futures or
//! callbacks to libraries which would otherwise lose the task-local MUST
//! pass them through [`bind`].

use crate::ids::{SpanId, TraceId};
use crate::mode::Mode;
use crate::{ENV_VARS_HEADER, TRACE_ID_HEADER};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// SpanInfo
// ---------------------------------------------------------------------------

/// The slice of a live span visible through the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanInfo {
    /// Id of the current span.
    pub span_id: SpanId,
    /// Trace the span belongs to.
    pub trace_id: TraceId,
    /// Whether the span was opened before app readiness.
    pub is_pre_app_start: bool,
    /// Whether child operations under this span must not be recorded.
    pub stop_recording_child_spans: bool,
}

// ---------------------------------------------------------------------------
// ContextFrame
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FrameInner {
    trace_id: TraceId,
    mode: Mode,
    server_entered: bool,
    env_snapshot: BTreeMap<String, String>,
}

/// Per-request context: trace id, mode, and environment snapshot.
///
/// Cheap to clone; all clones observe the same frame.
#[derive(Debug, Clone)]
pub struct ContextFrame {
    inner: Arc<FrameInner>,
}

impl ContextFrame {
    /// Frame for a server-entered request, adopting the inbound trace id
    /// and environment snapshot when the driver supplied them.
    ///
    /// Header names are expected lower-cased ([`TRACE_ID_HEADER`],
    /// [`ENV_VARS_HEADER`]). A malformed env-vars header is ignored.
    #[must_use]
    pub fn from_inbound_headers(mode: Mode, headers: &BTreeMap<String, String>) -> Self {
        let trace_id = headers
            .get(TRACE_ID_HEADER)
            .and_then(|v| TraceId::from_header(v))
            .unwrap_or_else(TraceId::new_synthetic);
        let env_snapshot = headers
            .get(ENV_VARS_HEADER)
            .and_then(|raw| serde_json::from_str::<BTreeMap<String, String>>(raw).ok())
            .unwrap_or_default();
        Self {
            inner: Arc::new(FrameInner {
                trace_id,
                mode,
                server_entered: true,
                env_snapshot,
            }),
        }
    }

    /// Frame for a background operation with a synthetic trace id.
    #[must_use]
    pub fn background(mode: Mode) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                trace_id: TraceId::new_synthetic(),
                mode,
                server_entered: false,
                env_snapshot: BTreeMap::new(),
            }),
        }
    }

    /// The frame's trace id.
    #[must_use]
    pub fn trace_id(&self) -> &TraceId {
        &self.inner.trace_id
    }

    /// The mode the frame was opened under.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.inner.mode
    }

    /// Whether the frame was opened by an inbound server request.
    #[must_use]
    pub fn server_entered(&self) -> bool {
        self.inner.server_entered
    }

    /// Look up an environment variable, preferring the inbound snapshot
    /// over the process environment.
    #[must_use]
    pub fn env_var(&self, name: &str) -> Option<String> {
        self.inner
            .env_snapshot
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    /// The raw inbound environment snapshot.
    #[must_use]
    pub fn env_snapshot(&self) -> &BTreeMap<String, String> {
        &self.inner.env_snapshot
    }
}

// ---------------------------------------------------------------------------
// Ambient current
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Ambient {
    frame: ContextFrame,
    span: Option<SpanInfo>,
}

tokio::task_local! {
    static AMBIENT: Ambient;
}

/// The current frame, when the calling task runs inside one.
#[must_use]
pub fn current() -> Option<ContextFrame> {
    AMBIENT.try_with(|a| a.frame.clone()).ok()
}

/// The current span, when one is executing on the calling task.
#[must_use]
pub fn current_span_info() -> Option<SpanInfo> {
    AMBIENT.try_with(|a| a.span.clone()).ok().flatten()
}

/// Run `fut` with `frame` installed as the current context.
///
/// Used at server entry, before any span exists.
pub async fn scope<F: Future>(frame: ContextFrame, fut: F) -> F::Output {
    AMBIENT.scope(Ambient { frame, span: None }, fut).await
}

/// Run `fut` with `frame` current and `span` as the current span.
///
/// The kernel calls this for the duration of a span body; nested spans
/// shadow their parent and the parent is restored when the body returns.
pub async fn scope_with_span<F: Future>(frame: ContextFrame, span: SpanInfo, fut: F) -> F::Output {
    AMBIENT
        .scope(
            Ambient {
                frame,
                span: Some(span),
            },
            fut,
        )
        .await
}

/// Bind `fut` to the caller's current context.
///
/// The context is captured when `bind` is called, not when the returned
/// future is first polled, so the future observes the frame and span that
/// were current at the bind site regardless of which task later polls it.
/// Futures handed to libraries that spawn or re-schedule them must be
/// bound, or their child operations execute without a parent span and are
/// invisible to record/replay.
pub fn bind<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    let ambient = AMBIENT.try_with(Clone::clone).ok();
    async move {
        match ambient {
            Some(a) => AMBIENT.scope(a, fut).await,
            None => fut.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn inbound_trace_id_is_adopted_verbatim() {
        let frame = ContextFrame::from_inbound_headers(
            Mode::Replay,
            &headers(&[(TRACE_ID_HEADER, "driver-trace-7")]),
        );
        assert_eq!(frame.trace_id().as_str(), "driver-trace-7");
        assert!(frame.server_entered());
    }

    #[tokio::test]
    async fn missing_trace_header_allocates_synthetic_id() {
        let a = ContextFrame::from_inbound_headers(Mode::Record, &headers(&[]));
        let b = ContextFrame::from_inbound_headers(Mode::Record, &headers(&[]));
        assert_ne!(a.trace_id(), b.trace_id());
    }

    #[tokio::test]
    async fn env_snapshot_overrides_process_env() {
        let frame = ContextFrame::from_inbound_headers(
            Mode::Replay,
            &headers(&[(ENV_VARS_HEADER, r#"{"FEATURE_FLAG":"on"}"#)]),
        );
        assert_eq!(frame.env_var("FEATURE_FLAG").as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn malformed_env_snapshot_is_ignored() {
        let frame = ContextFrame::from_inbound_headers(
            Mode::Replay,
            &headers(&[(ENV_VARS_HEADER, "not json")]),
        );
        assert!(frame.env_snapshot().is_empty());
    }

    #[tokio::test]
    async fn current_is_none_outside_any_scope() {
        assert!(current().is_none());
        assert!(current_span_info().is_none());
    }

    #[tokio::test]
    async fn scope_installs_and_restores() {
        let frame = ContextFrame::background(Mode::Record);
        let trace = frame.trace_id().clone();
        scope(frame, async move {
            assert_eq!(current().unwrap().trace_id(), &trace);
            assert!(current_span_info().is_none());
        })
        .await;
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn bound_future_keeps_context_across_spawn() {
        let frame = ContextFrame::background(Mode::Record);
        let trace = frame.trace_id().clone();
        let bound = scope(frame, async { bind(async { current().map(|f| f.trace_id().clone()) }) })
            .await;
        // Polled from a task with no ambient context at all.
        let observed = tokio::spawn(bound).await.unwrap();
        assert_eq!(observed, Some(trace));
    }

    #[tokio::test]
    async fn unbound_future_loses_context() {
        let frame = ContextFrame::background(Mode::Record);
        let fut = async { current().is_some() };
        let observed = scope(frame, async { tokio::spawn(fut).await.unwrap() }).await;
        assert!(!observed);
    }
}
