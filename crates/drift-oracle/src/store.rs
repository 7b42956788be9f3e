// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory recorded-span store.

use crate::matching::inputs_match;
use crate::{MockOracle, MockQuery, MockResult};
use async_trait::async_trait;
use drift_core::{ExportError, SpanExporter, SpanRecord, TraceId};
use drift_schema::SchemaMerges;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

struct StoredSpan {
    record: SpanRecord,
    consumed_by: HashSet<TraceId>,
}

#[derive(Default)]
struct StoreInner {
    /// Spans per trace, in recording order.
    by_trace: HashMap<TraceId, Vec<usize>>,
    /// Pre-app-start spans, matchable from any trace.
    pre_app: Vec<usize>,
    spans: Vec<StoredSpan>,
}

/// In-memory implementation of the oracle contract.
///
/// Also a [`SpanExporter`], so a RECORD run can register it on the kernel
/// and a subsequent REPLAY run resolves against what was just recorded.
/// Cheap to clone; clones share the store.
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl RecordingStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one recorded span. Ingestion order is recording order and
    /// decides tie-breaks at match time.
    pub fn load(&self, record: SpanRecord) {
        let mut inner = self.inner.lock().expect("store lock");
        let index = inner.spans.len();
        if record.is_pre_app_start {
            inner.pre_app.push(index);
        } else {
            inner
                .by_trace
                .entry(record.trace_id.clone())
                .or_default()
                .push(index);
        }
        inner.spans.push(StoredSpan {
            record,
            consumed_by: HashSet::new(),
        });
    }

    /// Ingest a batch of recorded spans.
    pub fn load_all(&self, records: impl IntoIterator<Item = SpanRecord>) {
        for record in records {
            self.load(record);
        }
    }

    /// Forget all consumption marks, making every span matchable again.
    pub fn reset_consumption(&self) {
        let mut inner = self.inner.lock().expect("store lock");
        for span in &mut inner.spans {
            span.consumed_by.clear();
        }
    }

    /// Number of spans held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("store lock").spans.len()
    }

    /// Whether the store holds no spans.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, query: &MockQuery, merges: Option<&SchemaMerges>) -> Option<MockResult> {
        let mut inner = self.inner.lock().expect("store lock");
        let candidates: Vec<usize> = {
            let in_trace = inner
                .by_trace
                .get(&query.trace_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            in_trace.iter().chain(inner.pre_app.iter()).copied().collect()
        };

        let index = candidates.into_iter().find(|&i| {
            let stored = &inner.spans[i];
            let r = &stored.record;
            !stored.consumed_by.contains(&query.trace_id)
                && r.package_name == query.package_name
                && r.submodule_name == query.submodule_name
                && r.name == query.name
                && r.kind == query.kind
                && inputs_match(&r.input_value, &query.input_value, merges)
        })?;

        let stored = &mut inner.spans[index];
        stored.consumed_by.insert(query.trace_id.clone());
        debug!(
            span_id = %stored.record.span_id,
            trace_id = %query.trace_id,
            name = %query.name,
            "recorded span matched and consumed"
        );
        stored
            .record
            .output_value
            .clone()
            .map(|result| MockResult { result })
    }
}

#[async_trait]
impl MockOracle for RecordingStore {
    async fn find_mock_response(
        &self,
        query: &MockQuery,
        merges: Option<&SchemaMerges>,
    ) -> Option<MockResult> {
        self.resolve(query, merges)
    }
}

impl SpanExporter for RecordingStore {
    fn name(&self) -> &str {
        "recording-store"
    }

    fn export(&self, span: &SpanRecord) -> Result<(), ExportError> {
        self.load(span.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::{PackageType, SpanId, SpanKind, SpanStatus, SpanTiming};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn recorded(
        trace: &TraceId,
        name: &str,
        input: serde_json::Value,
        output: serde_json::Value,
    ) -> SpanRecord {
        SpanRecord {
            span_id: SpanId::new(),
            trace_id: trace.clone(),
            parent_span_id: None,
            kind: SpanKind::Client,
            package_type: PackageType::Http,
            package_name: "http".into(),
            instrumentation_name: "HttpInstrumentation".into(),
            submodule_name: "request".into(),
            name: name.into(),
            input_value: input,
            output_value: Some(output),
            status: SpanStatus::ok(),
            timing: SpanTiming::started_now(),
            is_pre_app_start: false,
            stop_recording_child_spans: false,
            stack_trace: None,
            transform_actions: None,
        }
    }

    fn query(trace: &TraceId, name: &str, input: serde_json::Value) -> MockQuery {
        MockQuery {
            trace_id: trace.clone(),
            span_id: SpanId::new(),
            name: name.into(),
            submodule_name: "request".into(),
            package_name: "http".into(),
            instrumentation_name: "HttpInstrumentation".into(),
            input_value: input,
            kind: SpanKind::Client,
            stack_trace: None,
        }
    }

    #[tokio::test]
    async fn matching_span_is_returned_and_consumed() {
        let store = RecordingStore::new();
        let trace = TraceId::new_synthetic();
        store.load(recorded(
            &trace,
            "/api/login",
            json!({"method": "POST"}),
            json!({"statusCode": 200}),
        ));

        let q = query(&trace, "/api/login", json!({"method": "POST"}));
        let hit = store.find_mock_response(&q, None).await.unwrap();
        assert_eq!(hit.result, json!({"statusCode": 200}));

        // Consumed: a second identical call misses.
        assert!(store.find_mock_response(&q, None).await.is_none());
    }

    #[tokio::test]
    async fn miss_on_unknown_name() {
        let store = RecordingStore::new();
        let trace = TraceId::new_synthetic();
        store.load(recorded(&trace, "/api/login", json!({}), json!({})));
        let q = query(&trace, "/unknown", json!({}));
        assert!(store.find_mock_response(&q, None).await.is_none());
    }

    #[tokio::test]
    async fn miss_on_foreign_trace() {
        let store = RecordingStore::new();
        let trace = TraceId::new_synthetic();
        store.load(recorded(&trace, "/api/login", json!({}), json!({})));
        let q = query(&TraceId::new_synthetic(), "/api/login", json!({}));
        assert!(store.find_mock_response(&q, None).await.is_none());
    }

    #[tokio::test]
    async fn ties_break_to_first_unconsumed_in_recording_order() {
        let store = RecordingStore::new();
        let trace = TraceId::new_synthetic();
        store.load(recorded(&trace, "/poll", json!({}), json!({"seq": 1})));
        store.load(recorded(&trace, "/poll", json!({}), json!({"seq": 2})));

        let q = query(&trace, "/poll", json!({}));
        let first = store.find_mock_response(&q, None).await.unwrap();
        let second = store.find_mock_response(&q, None).await.unwrap();
        assert_eq!(first.result, json!({"seq": 1}));
        assert_eq!(second.result, json!({"seq": 2}));
        assert!(store.find_mock_response(&q, None).await.is_none());
    }

    #[tokio::test]
    async fn pre_app_start_spans_match_from_any_trace() {
        let store = RecordingStore::new();
        let setup_trace = TraceId::new_synthetic();
        let mut span = recorded(&setup_trace, "connect", json!({}), json!({"ok": true}));
        span.is_pre_app_start = true;
        store.load(span);

        let q = query(&TraceId::new_synthetic(), "connect", json!({}));
        assert!(store.find_mock_response(&q, None).await.is_some());

        // Consumption is per consuming trace.
        let q2 = query(&TraceId::new_synthetic(), "connect", json!({}));
        assert!(store.find_mock_response(&q2, None).await.is_some());
        assert!(store.find_mock_response(&q2, None).await.is_none());
    }

    #[tokio::test]
    async fn reset_consumption_revives_spans() {
        let store = RecordingStore::new();
        let trace = TraceId::new_synthetic();
        store.load(recorded(&trace, "/one", json!({}), json!({})));
        let q = query(&trace, "/one", json!({}));
        assert!(store.find_mock_response(&q, None).await.is_some());
        assert!(store.find_mock_response(&q, None).await.is_none());
        store.reset_consumption();
        assert!(store.find_mock_response(&q, None).await.is_some());
    }

    #[tokio::test]
    async fn exporter_feed_is_matchable() {
        let store = RecordingStore::new();
        let trace = TraceId::new_synthetic();
        store
            .export(&recorded(&trace, "/fed", json!({}), json!({"ok": 1})))
            .unwrap();
        let q = query(&trace, "/fed", json!({}));
        assert_eq!(
            store.find_mock_response(&q, None).await.unwrap().result,
            json!({"ok": 1})
        );
    }
}
