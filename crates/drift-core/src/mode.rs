// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mode gate.
//!
//! Every wrapped method routes through [`ModeGate::handle_interception`],
//! the single point that decides between the RECORD path, the REPLAY path,
//! pass-through, and the background no-op. Adapters supply the four
//! possible continuations as an [`InterceptionHandlers`] value; exactly one
//! of them is consumed per call.

use crate::MODE_ENV_VAR;
use crate::context::{self, ContextFrame};
use crate::kernel::{ActiveSpan, SpanKernel};
use crate::span::SpanDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// SDK operating mode, selected by `TUSK_DRIFT_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Intercept and record outbound calls, then dispatch to the real
    /// backend.
    Record,
    /// Intercept outbound calls and resolve them from recordings; never
    /// touch the network.
    Replay,
    /// Pass everything through untouched (the default).
    #[default]
    Disabled,
}

impl Mode {
    /// Read the mode from the environment. Unset or unrecognized values
    /// fall back to [`Mode::Disabled`] (unrecognized ones with a warning).
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var(MODE_ENV_VAR) {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(value = %raw, "unrecognized {MODE_ENV_VAR}; instrumentation disabled");
                Self::Disabled
            }),
            Err(_) => Self::Disabled,
        }
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RECORD" => Ok(Self::Record),
            "REPLAY" => Ok(Self::Replay),
            "DISABLED" => Ok(Self::Disabled),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record => write!(f, "RECORD"),
            Self::Replay => write!(f, "REPLAY"),
            Self::Disabled => write!(f, "DISABLED"),
        }
    }
}

// ---------------------------------------------------------------------------
// InterceptionHandlers
// ---------------------------------------------------------------------------

/// The four continuations of one intercepted call.
///
/// Exactly one runs; each consumes the handler set, which owns everything
/// needed to perform the call (arguments, the original function, client
/// handles). Obligations:
///
/// - `record` must call the original itself, capture its outcome on the
///   span, end the span, and return the original's value unchanged,
///   re-raising original failures. Instrumentation-internal errors must
///   be swallowed in favor of the original value.
/// - `replay` must resolve the call from the oracle and never touch real
///   I/O; on instrumentation failure it returns the least harmful empty
///   shape for the library.
/// - `no_op` returns the adapter's semantically empty success.
#[async_trait]
pub trait InterceptionHandlers<T>: Send {
    /// Dispatch to the real library, uninstrumented.
    async fn call_original(self) -> T;

    /// The RECORD path, inside `span`.
    async fn record(self, span: ActiveSpan) -> T;

    /// The REPLAY path, inside `span`.
    async fn replay(self, span: ActiveSpan) -> T;

    /// The background-replay path: an adapter-specific empty success.
    async fn no_op(self) -> T;
}

/// Static facts about one interception site.
#[derive(Debug, Clone)]
pub struct InterceptSpec {
    /// Span to open for the recorded/replayed operation.
    pub descriptor: SpanDescriptor,
    /// Whether this call *is* the inbound server request.
    pub is_server_request: bool,
    /// The owning adapter's [`crate::Adapter::server_entered`] declaration.
    pub adapter_server_entered: bool,
}

// ---------------------------------------------------------------------------
// ModeGate
// ---------------------------------------------------------------------------

/// The single RECORD / REPLAY / DISABLED decision point.
///
/// Cheap to clone; clones share the readiness latch.
#[derive(Debug, Clone)]
pub struct ModeGate {
    mode: Mode,
    app_ready: Arc<AtomicBool>,
}

impl ModeGate {
    /// Gate for the given mode, with the app not yet ready.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            app_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The configured mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Latch the end of the pre-app-start window. One-way.
    pub fn mark_app_as_ready(&self) {
        self.app_ready.store(true, Ordering::SeqCst);
    }

    /// Whether `mark_app_as_ready` has been called.
    #[must_use]
    pub fn is_app_ready(&self) -> bool {
        self.app_ready.load(Ordering::SeqCst)
    }

    /// Route one intercepted call.
    ///
    /// See the module docs for the decision table. Spans opened before the
    /// readiness latch are marked pre-app-start so the oracle can treat
    /// setup-time traffic differently.
    pub async fn handle_interception<T, H>(
        &self,
        kernel: &SpanKernel,
        spec: InterceptSpec,
        handlers: H,
    ) -> T
    where
        H: InterceptionHandlers<T>,
    {
        if self.mode == Mode::Disabled {
            return handlers.call_original().await;
        }

        if let Some(current) = context::current_span_info() {
            if current.stop_recording_child_spans {
                debug!(
                    name = %spec.descriptor.name,
                    "parent span suppresses child recording; passing through"
                );
                return handlers.call_original().await;
            }
        }

        let pre_app_start = !self.is_app_ready();

        if spec.is_server_request {
            // Server spans are captured identically in RECORD and REPLAY:
            // inbound requests are never mocked, they only establish trace
            // context for their children.
            let frame = context::current()
                .unwrap_or_else(|| ContextFrame::background(self.mode));
            return kernel
                .create_and_execute_span(&frame, pre_app_start, spec.descriptor, |span| {
                    handlers.record(span)
                })
                .await;
        }

        match self.mode {
            Mode::Record => match context::current() {
                Some(frame) => {
                    kernel
                        .create_and_execute_span(&frame, pre_app_start, spec.descriptor, |span| {
                            handlers.record(span)
                        })
                        .await
                }
                None if spec.adapter_server_entered => {
                    // Background call from an adapter that normally runs
                    // inside requests: record it under a synthetic trace id.
                    let frame = ContextFrame::background(Mode::Record);
                    kernel
                        .create_and_execute_span(&frame, pre_app_start, spec.descriptor, |span| {
                            handlers.record(span)
                        })
                        .await
                }
                None => {
                    debug!(
                        name = %spec.descriptor.name,
                        "background call from non-server-entered adapter; not recorded"
                    );
                    handlers.call_original().await
                }
            },
            Mode::Replay => match context::current() {
                Some(frame) => {
                    kernel
                        .create_and_execute_span(&frame, pre_app_start, spec.descriptor, |span| {
                            handlers.replay(span)
                        })
                        .await
                }
                // Background replay calls must never touch the network and
                // never fail with "no mock found".
                None => handlers.no_op().await,
            },
            Mode::Disabled => unreachable!("disabled handled above"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{ExportError, SpanExporter};
    use crate::span::{PackageType, SpanKind, SpanRecord, SpanStatus};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Sink {
        spans: Arc<Mutex<Vec<SpanRecord>>>,
    }
    impl SpanExporter for Sink {
        fn name(&self) -> &str {
            "sink"
        }
        fn export(&self, span: &SpanRecord) -> Result<(), ExportError> {
            self.spans.lock().unwrap().push(span.clone());
            Ok(())
        }
    }

    struct Probe;

    #[async_trait]
    impl InterceptionHandlers<&'static str> for Probe {
        async fn call_original(self) -> &'static str {
            "original"
        }
        async fn record(self, span: ActiveSpan) -> &'static str {
            span.end(SpanStatus::ok());
            "record"
        }
        async fn replay(self, span: ActiveSpan) -> &'static str {
            span.end(SpanStatus::ok());
            "replay"
        }
        async fn no_op(self) -> &'static str {
            "no_op"
        }
    }

    fn spec(kind: SpanKind, is_server: bool) -> InterceptSpec {
        InterceptSpec {
            descriptor: SpanDescriptor::new(
                "op",
                "sub",
                "pkg",
                "PkgInstrumentation",
                PackageType::Unspecified,
                kind,
                json!({}),
            ),
            is_server_request: is_server,
            adapter_server_entered: true,
        }
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("record".parse::<Mode>().unwrap(), Mode::Record);
        assert_eq!("REPLAY".parse::<Mode>().unwrap(), Mode::Replay);
        assert_eq!("Disabled".parse::<Mode>().unwrap(), Mode::Disabled);
        assert!("observe".parse::<Mode>().is_err());
    }

    #[tokio::test]
    async fn disabled_calls_original() {
        let gate = ModeGate::new(Mode::Disabled);
        let kernel = SpanKernel::new();
        let out = gate
            .handle_interception(&kernel, spec(SpanKind::Client, false), Probe)
            .await;
        assert_eq!(out, "original");
    }

    #[tokio::test]
    async fn record_inside_request_context_records() {
        let gate = ModeGate::new(Mode::Record);
        gate.mark_app_as_ready();
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));

        let frame = ContextFrame::background(Mode::Record);
        let out = context::scope(
            frame,
            gate.handle_interception(&kernel, spec(SpanKind::Client, false), Probe),
        )
        .await;
        assert_eq!(out, "record");
        let spans = sink.spans.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert!(!spans[0].is_pre_app_start);
    }

    #[tokio::test]
    async fn record_background_uses_synthetic_trace() {
        let gate = ModeGate::new(Mode::Record);
        gate.mark_app_as_ready();
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));

        let out = gate
            .handle_interception(&kernel, spec(SpanKind::Client, false), Probe)
            .await;
        assert_eq!(out, "record");
        assert_eq!(sink.spans.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_background_skips_non_server_entered_adapters() {
        let gate = ModeGate::new(Mode::Record);
        gate.mark_app_as_ready();
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));

        let mut s = spec(SpanKind::Client, false);
        s.adapter_server_entered = false;
        let out = gate.handle_interception(&kernel, s, Probe).await;
        assert_eq!(out, "original");
        assert!(sink.spans.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_without_context_is_a_no_op() {
        let gate = ModeGate::new(Mode::Replay);
        gate.mark_app_as_ready();
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));

        let out = gate
            .handle_interception(&kernel, spec(SpanKind::Client, false), Probe)
            .await;
        assert_eq!(out, "no_op");
        assert!(sink.spans.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replay_inside_context_replays() {
        let gate = ModeGate::new(Mode::Replay);
        gate.mark_app_as_ready();
        let kernel = SpanKernel::new();
        let frame = ContextFrame::background(Mode::Replay);
        let out = context::scope(
            frame,
            gate.handle_interception(&kernel, spec(SpanKind::Client, false), Probe),
        )
        .await;
        assert_eq!(out, "replay");
    }

    #[tokio::test]
    async fn pre_app_start_spans_are_flagged() {
        let gate = ModeGate::new(Mode::Record);
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));

        gate.handle_interception(&kernel, spec(SpanKind::Client, false), Probe)
            .await;
        assert!(sink.spans.lock().unwrap()[0].is_pre_app_start);

        gate.mark_app_as_ready();
        gate.handle_interception(&kernel, spec(SpanKind::Client, false), Probe)
            .await;
        assert!(!sink.spans.lock().unwrap()[1].is_pre_app_start);
    }

    #[tokio::test]
    async fn suppressed_parent_passes_children_through() {
        let gate = ModeGate::new(Mode::Record);
        gate.mark_app_as_ready();
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));

        let mut parent = spec(SpanKind::Client, false);
        parent.descriptor.stop_recording_child_spans = true;

        let frame = ContextFrame::background(Mode::Record);
        let gate2 = gate.clone();
        let kernel2 = kernel.clone();
        let out = context::scope(frame.clone(), async move {
            kernel2
                .clone()
                .create_and_execute_span(&frame, false, parent.descriptor, |_span| async move {
                    gate2
                        .handle_interception(&kernel2, spec(SpanKind::Client, false), Probe)
                        .await
                })
                .await
        })
        .await;
        assert_eq!(out, "original");
        // Only the parent span was exported.
        assert_eq!(sink.spans.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn server_requests_record_in_replay_mode_too() {
        let gate = ModeGate::new(Mode::Replay);
        gate.mark_app_as_ready();
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));

        let frame = ContextFrame::background(Mode::Replay);
        let out = context::scope(
            frame,
            gate.handle_interception(&kernel, spec(SpanKind::Server, true), Probe),
        )
        .await;
        assert_eq!(out, "record");
        assert_eq!(sink.spans.lock().unwrap().len(), 1);
    }
}
