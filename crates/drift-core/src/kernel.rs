// SPDX-License-Identifier: MIT OR Apache-2.0
//! Span kernel.
//!
//! Owns every live span: allocation, attribute updates, exactly-once end,
//! and the processor/export fan-out that runs when a span ends. Spans move
//! through `created → executing → ended`; `ended` is terminal.

use crate::context::{self, ContextFrame, SpanInfo};
use crate::export::{SpanExporter, SpanProcessor};
use crate::ids::SpanId;
use crate::span::{SpanAttributes, SpanDescriptor, SpanRecord, SpanStatus, SpanTiming};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Span state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Executing,
    Ended,
}

#[derive(Debug)]
struct SpanState {
    record: SpanRecord,
    phase: Phase,
    started: Instant,
}

// ---------------------------------------------------------------------------
// ActiveSpan
// ---------------------------------------------------------------------------

/// Handle to a live span, passed into record/replay handlers.
///
/// Clones share the same span. Ending is exactly-once: the second and later
/// `end` calls are dropped with a logged warning, as are attribute updates
/// after end.
#[derive(Clone)]
pub struct ActiveSpan {
    state: Arc<Mutex<SpanState>>,
    kernel: SpanKernel,
}

impl ActiveSpan {
    /// Id of this span.
    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.state.lock().expect("span state lock").record.span_id
    }

    /// The context-visible slice of this span.
    #[must_use]
    pub fn info(&self) -> SpanInfo {
        let state = self.state.lock().expect("span state lock");
        SpanInfo {
            span_id: state.record.span_id,
            trace_id: state.record.trace_id.clone(),
            is_pre_app_start: state.record.is_pre_app_start,
            stop_recording_child_spans: state.record.stop_recording_child_spans,
        }
    }

    /// Apply a partial attribute update.
    pub fn add_attributes(&self, attrs: SpanAttributes) {
        let mut state = self.state.lock().expect("span state lock");
        if state.phase == Phase::Ended {
            warn!(
                span_id = %state.record.span_id,
                "attributes added after span end; dropped"
            );
            return;
        }
        let record = &mut state.record;
        if let Some(name) = attrs.name {
            record.name = name;
        }
        if let Some(submodule) = attrs.submodule_name {
            record.submodule_name = submodule;
        }
        if let Some(input) = attrs.input_value {
            record.input_value = input;
        }
        if let Some(patch) = attrs.input_patch {
            if let serde_json::Value::Object(input) = &mut record.input_value {
                input.extend(patch);
            }
        }
        if let Some(output) = attrs.output_value {
            record.output_value = Some(output);
        }
    }

    /// End the span with `status`, then run the processor chain and fan the
    /// result out to every registered exporter.
    pub fn end(&self, status: SpanStatus) {
        let record = {
            let mut state = self.state.lock().expect("span state lock");
            if state.phase == Phase::Ended {
                warn!(span_id = %state.record.span_id, "span ended twice; second end dropped");
                return;
            }
            state.phase = Phase::Ended;
            state.record.status = status;
            state.record.timing.ended_at = Some(Utc::now());
            state.record.timing.duration_micros =
                Some(u64::try_from(state.started.elapsed().as_micros()).unwrap_or(u64::MAX));
            state.record.clone()
        };
        self.kernel.finish(record);
    }

    /// Whether the span has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state.lock().expect("span state lock").phase == Phase::Ended
    }
}

// ---------------------------------------------------------------------------
// SpanKernel
// ---------------------------------------------------------------------------

#[derive(Default)]
struct KernelShared {
    processors: Mutex<Vec<Box<dyn SpanProcessor>>>,
    exporters: Mutex<Vec<Box<dyn SpanExporter>>>,
    live: Mutex<HashMap<SpanId, Weak<Mutex<SpanState>>>>,
}

/// Process-wide owner of spans and the export pipeline.
///
/// Cheap to clone; all clones share registration state.
#[derive(Clone, Default)]
pub struct SpanKernel {
    shared: Arc<KernelShared>,
}

impl SpanKernel {
    /// A kernel with no processors or exporters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a span processor; processors run in registration order
    /// between span end and export.
    pub fn register_processor(&self, processor: Box<dyn SpanProcessor>) {
        self.shared
            .processors
            .lock()
            .expect("processor lock")
            .push(processor);
    }

    /// Append an export adapter; exporters receive ended spans in
    /// registration order.
    pub fn register_exporter(&self, exporter: Box<dyn SpanExporter>) {
        self.shared
            .exporters
            .lock()
            .expect("exporter lock")
            .push(exporter);
    }

    /// Create a span from `descriptor`, install it as current for the
    /// duration of `body`, and return whatever `body` returns.
    ///
    /// The parent is whichever span is current at the call site. Every exit
    /// path releases the span: if `body` returns without ending it, the
    /// kernel ends it with ok status.
    pub async fn create_and_execute_span<T, F, Fut>(
        &self,
        frame: &ContextFrame,
        is_pre_app_start: bool,
        descriptor: SpanDescriptor,
        body: F,
    ) -> T
    where
        F: FnOnce(ActiveSpan) -> Fut,
        Fut: Future<Output = T>,
    {
        let span = self.open_span(frame, is_pre_app_start, descriptor);
        let info = span.info();
        let result =
            context::scope_with_span(frame.clone(), info, body(span.clone())).await;
        if !span.is_ended() {
            debug!(span_id = %span.span_id(), "span body returned without ending; ending ok");
            span.end(SpanStatus::ok());
        }
        result
    }

    /// Open a span that outlives any lexical scope.
    ///
    /// For event-driven operations (an outbound HTTP request object handed
    /// to the host) whose completion arrives through callbacks. The caller
    /// owns the release obligation: some completion path must call
    /// [`ActiveSpan::end`], exactly as `create_and_execute_span` would.
    #[must_use]
    pub fn start_detached_span(
        &self,
        frame: &ContextFrame,
        is_pre_app_start: bool,
        descriptor: SpanDescriptor,
    ) -> ActiveSpan {
        self.open_span(frame, is_pre_app_start, descriptor)
    }

    /// Apply a partial update to a live span by id.
    ///
    /// Lets code that only holds the context-visible [`SpanInfo`] (e.g. the
    /// GraphQL adapter annotating its enclosing server span) reach the span.
    /// No-op when the span has already ended or is unknown.
    pub fn add_attributes_by_id(&self, span_id: SpanId, attrs: SpanAttributes) {
        let handle = {
            let live = self.shared.live.lock().expect("live span lock");
            live.get(&span_id).and_then(Weak::upgrade)
        };
        match handle {
            Some(state) => ActiveSpan {
                state,
                kernel: self.clone(),
            }
            .add_attributes(attrs),
            None => warn!(%span_id, "attribute update for unknown or ended span; dropped"),
        }
    }

    fn open_span(
        &self,
        frame: &ContextFrame,
        is_pre_app_start: bool,
        descriptor: SpanDescriptor,
    ) -> ActiveSpan {
        let record = SpanRecord {
            span_id: SpanId::new(),
            trace_id: frame.trace_id().clone(),
            parent_span_id: context::current_span_info().map(|s| s.span_id),
            kind: descriptor.kind,
            package_type: descriptor.package_type,
            package_name: descriptor.package_name,
            instrumentation_name: descriptor.instrumentation_name,
            submodule_name: descriptor.submodule_name,
            name: descriptor.name,
            input_value: descriptor.input_value,
            output_value: None,
            status: SpanStatus::ok(),
            timing: SpanTiming::started_now(),
            is_pre_app_start,
            stop_recording_child_spans: descriptor.stop_recording_child_spans,
            stack_trace: descriptor.stack_trace,
            transform_actions: None,
        };
        let span_id = record.span_id;
        let state = Arc::new(Mutex::new(SpanState {
            record,
            phase: Phase::Executing,
            started: Instant::now(),
        }));
        self.shared
            .live
            .lock()
            .expect("live span lock")
            .insert(span_id, Arc::downgrade(&state));
        ActiveSpan {
            state,
            kernel: self.clone(),
        }
    }

    fn finish(&self, record: SpanRecord) {
        self.shared
            .live
            .lock()
            .expect("live span lock")
            .remove(&record.span_id);

        let mut processed = record;
        {
            let processors = self.shared.processors.lock().expect("processor lock");
            for processor in processors.iter() {
                processed = processor.process(processed);
            }
        }
        let exporters = self.shared.exporters.lock().expect("exporter lock");
        for exporter in exporters.iter() {
            if let Err(err) = exporter.export(&processed) {
                warn!(
                    exporter = exporter.name(),
                    span_id = %processed.span_id,
                    error = %err,
                    "span exporter failed; continuing"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportError;
    use crate::mode::Mode;
    use crate::span::{PackageType, SpanKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

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

    struct FailingExporter;
    impl SpanExporter for FailingExporter {
        fn name(&self) -> &str {
            "failing"
        }
        fn export(&self, _span: &SpanRecord) -> Result<(), ExportError> {
            Err(ExportError::Io("disk full".into()))
        }
    }

    fn descriptor(name: &str) -> SpanDescriptor {
        SpanDescriptor::new(
            name,
            "query",
            "mysql2",
            "MysqlInstrumentation",
            PackageType::Mysql,
            SpanKind::Client,
            json!({"sql": "SELECT 1"}),
        )
    }

    #[tokio::test]
    async fn span_is_exported_once_after_end() {
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));
        let frame = ContextFrame::background(Mode::Record);

        kernel
            .create_and_execute_span(&frame, false, descriptor("q1"), |span| async move {
                span.add_attributes(SpanAttributes::output(json!({"results": []})));
                span.end(SpanStatus::ok());
            })
            .await;

        let spans = sink.spans.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "q1");
        assert_eq!(spans[0].output_value, Some(json!({"results": []})));
        assert!(spans[0].timing.ended_at.is_some());
        assert!(spans[0].timing.duration_micros.is_some());
    }

    #[tokio::test]
    async fn body_without_explicit_end_is_released_ok() {
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));
        let frame = ContextFrame::background(Mode::Record);

        kernel
            .create_and_execute_span(&frame, false, descriptor("q"), |_span| async {})
            .await;

        let spans = sink.spans.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::ok());
    }

    #[tokio::test]
    async fn double_end_is_dropped() {
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));
        let frame = ContextFrame::background(Mode::Record);

        kernel
            .create_and_execute_span(&frame, false, descriptor("q"), |span| async move {
                span.end(SpanStatus::error("first"));
                span.end(SpanStatus::ok());
            })
            .await;

        let spans = sink.spans.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].status.is_error());
    }

    #[tokio::test]
    async fn attributes_after_end_are_dropped() {
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));
        let frame = ContextFrame::background(Mode::Record);

        kernel
            .create_and_execute_span(&frame, false, descriptor("q"), |span| async move {
                span.end(SpanStatus::ok());
                span.add_attributes(SpanAttributes::output(json!({"late": true})));
            })
            .await;

        let spans = sink.spans.lock().unwrap();
        assert_eq!(spans[0].output_value, None);
    }

    #[tokio::test]
    async fn child_span_links_to_parent_and_shares_trace() {
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));
        let frame = ContextFrame::background(Mode::Record);

        let kernel2 = kernel.clone();
        let frame2 = frame.clone();
        kernel
            .create_and_execute_span(&frame, false, descriptor("parent"), |_span| async move {
                kernel2
                    .create_and_execute_span(&frame2, false, descriptor("child"), |span| {
                        async move { span.end(SpanStatus::ok()) }
                    })
                    .await;
            })
            .await;

        let spans = sink.spans.lock().unwrap();
        // Children end before parents.
        assert_eq!(spans[0].name, "child");
        assert_eq!(spans[1].name, "parent");
        assert_eq!(spans[0].parent_span_id, Some(spans[1].span_id));
        assert_eq!(spans[0].trace_id, spans[1].trace_id);
    }

    #[tokio::test]
    async fn exporter_failure_does_not_stop_fanout() {
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(FailingExporter));
        kernel.register_exporter(Box::new(sink.clone()));
        let frame = ContextFrame::background(Mode::Record);

        kernel
            .create_and_execute_span(&frame, false, descriptor("q"), |span| async move {
                span.end(SpanStatus::ok());
            })
            .await;

        assert_eq!(sink.spans.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attributes_by_id_reach_a_live_span() {
        let kernel = SpanKernel::new();
        let sink = Sink::default();
        kernel.register_exporter(Box::new(sink.clone()));
        let frame = ContextFrame::background(Mode::Record);

        let kernel2 = kernel.clone();
        kernel
            .create_and_execute_span(&frame, false, descriptor("server"), |span| async move {
                let id = span.span_id();
                kernel2.add_attributes_by_id(
                    id,
                    SpanAttributes {
                        name: Some("query.getUser".into()),
                        ..SpanAttributes::default()
                    },
                );
                span.end(SpanStatus::ok());
            })
            .await;

        assert_eq!(sink.spans.lock().unwrap()[0].name, "query.getUser");
    }
}
