// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-adapter-http
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use drift_core::{
    Adapter, ContextFrame, InterceptSpec, InterceptionHandlers, Mode, ModeGate, PackageType,
    SpanAttributes, SpanDescriptor, SpanKernel, SpanKind, SpanStatus, context,
};
use drift_mock_http::{
    MockClientRequest, MockRequestContext, MockRequestOptions, PlaybackOutcome, RequestEvent,
};
use drift_oracle::{MockOracle, MockQuery};
use drift_patch::{Exports, MethodSlot, PatchedModule, SlotFn};
use drift_schema::{FieldAnnotation, SchemaMerges};
use drift_taxonomy::ReifiedError;
use futures::future::BoxFuture;
use semver::VersionReq;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Package name stamped on HTTP spans.
pub const PACKAGE_NAME: &str = "http";
/// Instrumentation identity stamped on HTTP spans.
pub const INSTRUMENTATION_NAME: &str = "HttpInstrumentation";

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// An inbound request as the server adapter sees it.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// HTTP method.
    pub method: String,
    /// Full request URL (or origin-form target).
    pub url: String,
    /// Headers, any case.
    pub headers: BTreeMap<String, String>,
    /// HTTP version string (`"1.1"`).
    pub http_version: String,
    /// Request body, when buffered.
    pub body: Option<Vec<u8>>,
}

/// The response the host produced for an inbound request.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    /// Status code.
    pub status_code: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

/// An outbound request at the client seam.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// HTTP method.
    pub method: String,
    /// `"http:"` or `"https:"`.
    pub protocol: String,
    /// Target host.
    pub hostname: String,
    /// Target port, when explicit.
    pub port: Option<u16>,
    /// Request path (with query).
    pub path: String,
    /// Headers, any case.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Vec<u8>,
}

/// An outbound response at the client seam.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundResponse {
    /// Status code.
    pub status_code: u16,
    /// Status message.
    pub status_message: String,
    /// Headers, lower-cased.
    pub headers: BTreeMap<String, String>,
    /// HTTP version string.
    pub http_version: String,
    /// Response body.
    pub body: Vec<u8>,
}

/// The transport the patch wraps: the library's own send path, held as a
/// wrappable method slot callable.
pub type HttpTransport =
    SlotFn<OutboundRequest, BoxFuture<'static, Result<OutboundResponse, ReifiedError>>>;

// ---------------------------------------------------------------------------
// HttpAdapter
// ---------------------------------------------------------------------------

/// The HTTP adapter instance.
#[derive(Clone)]
pub struct HttpAdapter {
    gate: ModeGate,
    kernel: SpanKernel,
    oracle: Arc<dyn MockOracle>,
    inbound_drop_check: Option<Arc<dyn Fn(&InboundRequest) -> bool + Send + Sync>>,
}

impl Adapter for HttpAdapter {
    fn package_name(&self) -> &'static str {
        PACKAGE_NAME
    }
    fn instrumentation_name(&self) -> &'static str {
        INSTRUMENTATION_NAME
    }
    fn package_type(&self) -> PackageType {
        PackageType::Http
    }
    fn supported_version_req(&self) -> &'static str {
        "*"
    }
}

impl HttpAdapter {
    /// Build the adapter against a gate, kernel, and oracle.
    #[must_use]
    pub fn new(gate: ModeGate, kernel: SpanKernel, oracle: Arc<dyn MockOracle>) -> Self {
        Self {
            gate,
            kernel,
            oracle,
            inbound_drop_check: None,
        }
    }

    /// Install a pre-span drop check for inbound requests (wired to the
    /// transform engine's drop rules). Requests it matches are served
    /// without creating a span.
    #[must_use]
    pub fn with_inbound_drop_check(
        mut self,
        check: impl Fn(&InboundRequest) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.inbound_drop_check = Some(Arc::new(check));
        self
    }

    /// The patch registration for this adapter: puts the exports'
    /// [`HttpTransport`] in a [`MethodSlot`] and wraps it so every send
    /// routes through [`Self::intercept_send`].
    #[must_use]
    pub fn patched_module(self: &Arc<Self>) -> PatchedModule {
        let adapter = Arc::clone(self);
        PatchedModule::new(
            PACKAGE_NAME,
            VersionReq::STAR,
            Arc::new(move |exports: Exports, _version: Option<&semver::Version>| {
                let Some(transport) = exports.downcast_ref::<HttpTransport>() else {
                    warn!("http exports were not an HttpTransport; leaving unpatched");
                    return exports;
                };
                let adapter = Arc::clone(&adapter);
                let mut slot = MethodSlot::from_shared("request", Arc::clone(transport));
                slot.wrap(move |original| {
                    Arc::new(move |request: OutboundRequest| {
                        let original = Arc::clone(&original);
                        let adapter = Arc::clone(&adapter);
                        Box::pin(async move {
                            adapter
                                .intercept_send(request, move |r| (original)(r))
                                .await
                        })
                    })
                });
                Arc::new(slot.handle()) as Exports
            }),
        )
    }

    // -- server side --------------------------------------------------------

    /// Handle one inbound request: open the trace context from the
    /// request's headers, capture a server span around `inner`, and return
    /// whatever `inner` produced.
    pub async fn handle_server_request<F, Fut>(
        &self,
        request: InboundRequest,
        inner: F,
    ) -> InboundResponse
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = InboundResponse> + Send,
    {
        if self.gate.mode() == Mode::Disabled {
            return inner().await;
        }
        if let Some(check) = &self.inbound_drop_check {
            if check(&request) {
                debug!(url = %request.url, "inbound request dropped by rule; serving unrecorded");
                return inner().await;
            }
        }

        let headers = lowercase_headers(&request.headers);
        let frame = ContextFrame::from_inbound_headers(self.gate.mode(), &headers);

        let descriptor = SpanDescriptor::new(
            path_of(&request.url),
            request.method.clone(),
            PACKAGE_NAME,
            INSTRUMENTATION_NAME,
            PackageType::Http,
            SpanKind::Server,
            server_input_value(&request, &headers),
        );
        let spec = InterceptSpec {
            descriptor,
            is_server_request: true,
            adapter_server_entered: true,
        };

        let handlers = ServerCall { inner };
        context::scope(
            frame,
            self.gate.handle_interception(&self.kernel, spec, handlers),
        )
        .await
    }

    // -- client side, promise-style -----------------------------------------

    /// Intercept a promise-style outbound send.
    ///
    /// RECORD: runs `original`, captures the exchange (errors reified and
    /// re-raised unchanged). REPLAY: resolves from the oracle; a miss is an
    /// error shaped like the library's own connection failures. DISABLED
    /// passes through.
    pub async fn intercept_send<F, Fut>(
        &self,
        request: OutboundRequest,
        original: F,
    ) -> Result<OutboundResponse, ReifiedError>
    where
        F: FnOnce(OutboundRequest) -> Fut + Send,
        Fut: Future<Output = Result<OutboundResponse, ReifiedError>> + Send,
    {
        let descriptor = SpanDescriptor::new(
            request.path.clone(),
            request.method.clone(),
            PACKAGE_NAME,
            INSTRUMENTATION_NAME,
            PackageType::Http,
            SpanKind::Client,
            client_input_value(&request),
        );
        let spec = InterceptSpec {
            descriptor,
            is_server_request: false,
            adapter_server_entered: true,
        };
        let handlers = ClientSend {
            adapter: self,
            request,
            original,
        };
        self.gate.handle_interception(&self.kernel, spec, handlers).await
    }

    // -- client side, event-style (replay) ----------------------------------

    /// Open a synthetic event-style request for REPLAY hosts.
    ///
    /// Inside a trace context this opens a client span that the playback
    /// completion ends; outside one it is a background request (synthetic
    /// `200 OK`, no oracle, no span).
    #[must_use]
    pub fn open_replay_request(
        &self,
        options: MockRequestOptions,
    ) -> (MockClientRequest, mpsc::UnboundedReceiver<RequestEvent>) {
        if self.gate.mode() != Mode::Replay {
            warn!("open_replay_request outside REPLAY mode; serving a synthetic empty response");
            return MockClientRequest::new(options, None, None);
        }
        let Some(frame) = context::current() else {
            return MockClientRequest::new(options, None, None);
        };

        let descriptor = SpanDescriptor::new(
            options.path.clone(),
            options.method.clone(),
            PACKAGE_NAME,
            INSTRUMENTATION_NAME,
            PackageType::Http,
            SpanKind::Client,
            Value::Null, // the driver supplies the final input at playback
        );
        let span = self.kernel.start_detached_span(
            &frame,
            !self.gate.is_app_ready(),
            descriptor,
        );

        let query = MockQuery {
            trace_id: frame.trace_id().clone(),
            span_id: span.span_id(),
            name: options.path.clone(),
            submodule_name: options.method.clone(),
            package_name: PACKAGE_NAME.into(),
            instrumentation_name: INSTRUMENTATION_NAME.into(),
            input_value: Value::Null,
            kind: SpanKind::Client,
            stack_trace: None,
        };
        let context = MockRequestContext {
            query,
            merges: default_client_merges(),
            oracle: Arc::clone(&self.oracle),
        };

        let hook_span = span.clone();
        let hook = Box::new(move |outcome: PlaybackOutcome| match outcome {
            PlaybackOutcome::Success { output, .. } => {
                hook_span.add_attributes(SpanAttributes::output(output));
                hook_span.end(SpanStatus::ok());
            }
            PlaybackOutcome::Background => hook_span.end(SpanStatus::ok()),
            PlaybackOutcome::OracleMiss => {
                hook_span.end(SpanStatus::error("no recorded response"));
            }
            PlaybackOutcome::Failed(reified) => {
                hook_span.add_attributes(SpanAttributes::output(reified.to_output_value()));
                hook_span.end(SpanStatus::error(reified.message.clone()));
            }
            PlaybackOutcome::Aborted => hook_span.end(SpanStatus::error("request aborted")),
        });

        MockClientRequest::new(options, Some(context), Some(hook))
    }
}

// ---------------------------------------------------------------------------
// Handler sets
// ---------------------------------------------------------------------------

struct ServerCall<F> {
    inner: F,
}

#[async_trait]
impl<F, Fut> InterceptionHandlers<InboundResponse> for ServerCall<F>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = InboundResponse> + Send,
{
    async fn call_original(self) -> InboundResponse {
        (self.inner)().await
    }

    async fn record(self, span: drift_core::ActiveSpan) -> InboundResponse {
        let response = (self.inner)().await;
        span.add_attributes(SpanAttributes::output(json!({
            "statusCode": response.status_code,
            "headers": lowercase_headers(&response.headers),
            "body": BASE64.encode(&response.body),
            "bodySize": response.body.len(),
        })));
        if response.status_code >= 500 {
            span.end(SpanStatus::error(format!("status {}", response.status_code)));
        } else {
            span.end(SpanStatus::ok());
        }
        response
    }

    async fn replay(self, span: drift_core::ActiveSpan) -> InboundResponse {
        // Inbound requests are never mocked; the gate routes server spans
        // through `record` in every mode.
        self.record(span).await
    }

    async fn no_op(self) -> InboundResponse {
        (self.inner)().await
    }
}

struct ClientSend<'a, F> {
    adapter: &'a HttpAdapter,
    request: OutboundRequest,
    original: F,
}

#[async_trait]
impl<'a, F, Fut> InterceptionHandlers<Result<OutboundResponse, ReifiedError>> for ClientSend<'a, F>
where
    F: FnOnce(OutboundRequest) -> Fut + Send,
    Fut: Future<Output = Result<OutboundResponse, ReifiedError>> + Send,
{
    async fn call_original(self) -> Result<OutboundResponse, ReifiedError> {
        (self.original)(self.request).await
    }

    async fn record(self, span: drift_core::ActiveSpan) -> Result<OutboundResponse, ReifiedError> {
        let result = (self.original)(self.request.clone()).await;
        match &result {
            Ok(response) => {
                span.add_attributes(SpanAttributes::output(json!({
                    "statusCode": response.status_code,
                    "statusMessage": response.status_message,
                    "headers": lowercase_headers(&response.headers),
                    "httpVersion": response.http_version,
                    "body": BASE64.encode(&response.body),
                })));
                span.end(SpanStatus::ok());
            }
            Err(error) => {
                span.add_attributes(SpanAttributes::output(error.to_output_value()));
                span.end(SpanStatus::error(error.message.clone()));
            }
        }
        result
    }

    async fn replay(self, span: drift_core::ActiveSpan) -> Result<OutboundResponse, ReifiedError> {
        let query = MockQuery {
            trace_id: span.info().trace_id,
            span_id: span.span_id(),
            name: self.request.path.clone(),
            submodule_name: self.request.method.clone(),
            package_name: PACKAGE_NAME.into(),
            instrumentation_name: INSTRUMENTATION_NAME.into(),
            input_value: client_input_value(&self.request),
            kind: SpanKind::Client,
            stack_trace: None,
        };
        let merges = client_merges_for(&self.request);

        match self.adapter.oracle.find_mock_response(&query, Some(&merges)).await {
            None => {
                let error = ReifiedError::capture(
                    "Error",
                    format!(
                        "no recorded response for {} {}{}",
                        self.request.method, self.request.hostname, self.request.path
                    ),
                );
                span.end(SpanStatus::error(error.message.clone()));
                Err(error)
            }
            Some(hit) => {
                if let Some(reified) = ReifiedError::from_output_value(&hit.result) {
                    span.add_attributes(SpanAttributes::output(hit.result.clone()));
                    span.end(SpanStatus::error(reified.message.clone()));
                    return Err(reified);
                }
                let response = response_from_output(&hit.result);
                span.add_attributes(SpanAttributes::output(hit.result));
                span.end(SpanStatus::ok());
                Ok(response)
            }
        }
    }

    async fn no_op(self) -> Result<OutboundResponse, ReifiedError> {
        Ok(OutboundResponse {
            status_code: 200,
            status_message: "OK".into(),
            headers: BTreeMap::new(),
            http_version: "1.1".into(),
            body: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Value shaping
// ---------------------------------------------------------------------------

fn lowercase_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect()
}

fn path_of(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    match without_query.find("://") {
        Some(scheme_end) => without_query[scheme_end + 3..]
            .find('/')
            .map(|i| without_query[scheme_end + 3 + i..].to_string())
            .unwrap_or_else(|| "/".to_string()),
        None => without_query.to_string(),
    }
}

fn server_input_value(request: &InboundRequest, headers: &BTreeMap<String, String>) -> Value {
    let mut input = json!({
        "method": request.method,
        "url": request.url,
        "target": path_of(&request.url),
        "headers": headers,
        "httpVersion": request.http_version,
        "bodySize": request.body.as_ref().map(Vec::len).unwrap_or(0),
    });
    if let Some(body) = &request.body {
        input["body"] = json!(BASE64.encode(body));
    }
    input
}

fn client_input_value(request: &OutboundRequest) -> Value {
    let mut input = json!({
        "method": request.method,
        "hostname": request.hostname,
        "path": request.path,
        "protocol": request.protocol,
        "headers": lowercase_headers(&request.headers),
        "bodySize": request.body.len(),
    });
    if let Some(port) = request.port {
        input["port"] = json!(port);
    }
    if !request.body.is_empty() {
        input["body"] = json!(BASE64.encode(&request.body));
    }
    input
}

/// Headers churn between a recording and a replay run (dates, agents,
/// connection management), so they are excluded from matching wholesale.
fn default_client_merges() -> SchemaMerges {
    SchemaMerges::new().with("headers", FieldAnnotation::ignored())
}

fn client_merges_for(request: &OutboundRequest) -> SchemaMerges {
    let mut merges = default_client_merges();
    if !request.body.is_empty() {
        let content_type = request
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| "application/octet-stream".into());
        merges = merges.with("body", FieldAnnotation::base64(content_type));
    }
    merges
}

fn response_from_output(output: &Value) -> OutboundResponse {
    let status_code = output
        .get("statusCode")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(200);
    let status_message = output
        .get("statusMessage")
        .and_then(Value::as_str)
        .unwrap_or("OK")
        .to_string();
    let http_version = output
        .get("httpVersion")
        .and_then(Value::as_str)
        .unwrap_or("1.1")
        .to_string();
    let mut headers = BTreeMap::new();
    if let Some(Value::Object(recorded)) = output.get("headers") {
        for (name, value) in recorded {
            let key = name.to_ascii_lowercase();
            // The stored body is uncompressed.
            if key == "content-encoding" {
                continue;
            }
            if let Some(v) = value.as_str() {
                headers.insert(key, v.to_string());
            }
        }
    }
    let body = output
        .get("body")
        .and_then(Value::as_str)
        .and_then(|encoded| BASE64.decode(encoded).ok())
        .unwrap_or_default();
    OutboundResponse {
        status_code,
        status_message,
        headers,
        http_version,
        body,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use drift_export::InMemoryExporter;
    use drift_oracle::RecordingStore;
    use pretty_assertions::assert_eq;

    fn adapter(mode: Mode, store: &RecordingStore) -> (HttpAdapter, InMemoryExporter) {
        let kernel = SpanKernel::new();
        let exporter = InMemoryExporter::new();
        kernel.register_exporter(Box::new(exporter.clone()));
        kernel.register_exporter(Box::new(store.clone()));
        let gate = ModeGate::new(mode);
        gate.mark_app_as_ready();
        (
            HttpAdapter::new(gate, kernel, Arc::new(store.clone())),
            exporter,
        )
    }

    fn login_request() -> OutboundRequest {
        OutboundRequest {
            method: "POST".into(),
            protocol: "http:".into(),
            hostname: "api.example.com".into(),
            port: None,
            path: "/api/auth/login".into(),
            headers: BTreeMap::from([("Content-Type".into(), "application/json".into())]),
            body: br#"{"email":"u@e.com","password":"p"}"#.to_vec(),
        }
    }

    fn ok_response(body: &[u8]) -> OutboundResponse {
        OutboundResponse {
            status_code: 200,
            status_message: "OK".into(),
            headers: BTreeMap::from([("content-type".into(), "application/json".into())]),
            http_version: "1.1".into(),
            body: body.to_vec(),
        }
    }

    async fn record_login(store: &RecordingStore, trace_header: &str) {
        let (adapter, _) = adapter(Mode::Record, store);
        let inbound = InboundRequest {
            method: "POST".into(),
            url: "/login".into(),
            headers: BTreeMap::from([("x-td-trace-id".into(), trace_header.into())]),
            http_version: "1.1".into(),
            body: None,
        };
        let inner_adapter = adapter.clone();
        adapter
            .handle_server_request(inbound, move || async move {
                let result = inner_adapter
                    .intercept_send(login_request(), |_req| async {
                        Ok(ok_response(br#"{"token":"T"}"#))
                    })
                    .await
                    .unwrap();
                InboundResponse {
                    status_code: result.status_code,
                    headers: BTreeMap::new(),
                    body: result.body,
                }
            })
            .await;
    }

    #[tokio::test]
    async fn record_then_replay_roundtrip() {
        let store = RecordingStore::new();
        record_login(&store, "trace-1").await;

        // Replay the same inbound request under the same trace id.
        let (replay_adapter, exporter) = adapter(Mode::Replay, &store);
        let inbound = InboundRequest {
            method: "POST".into(),
            url: "/login".into(),
            headers: BTreeMap::from([("x-td-trace-id".into(), "trace-1".into())]),
            http_version: "1.1".into(),
            body: None,
        };
        let inner_adapter = replay_adapter.clone();
        let response = replay_adapter
            .handle_server_request(inbound, move || async move {
                let result = inner_adapter
                    .intercept_send(login_request(), |_req| async {
                        panic!("replay must not touch the transport")
                    })
                    .await
                    .unwrap();
                InboundResponse {
                    status_code: result.status_code,
                    headers: BTreeMap::new(),
                    body: result.body,
                }
            })
            .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, br#"{"token":"T"}"#);

        let spans = exporter.spans();
        let client = spans.iter().find(|s| s.kind == SpanKind::Client).unwrap();
        assert_eq!(client.name, "/api/auth/login");
        assert_eq!(client.trace_id.as_str(), "trace-1");
        assert!(!client.status.is_error());
    }

    #[tokio::test]
    async fn replay_miss_is_a_library_shaped_error() {
        let store = RecordingStore::new();
        let (replay_adapter, exporter) = adapter(Mode::Replay, &store);
        let inbound = InboundRequest {
            method: "GET".into(),
            url: "/page".into(),
            headers: BTreeMap::from([("x-td-trace-id".into(), "trace-2".into())]),
            http_version: "1.1".into(),
            body: None,
        };
        let inner_adapter = replay_adapter.clone();
        replay_adapter
            .handle_server_request(inbound, move || async move {
                let mut unknown = login_request();
                unknown.path = "/unknown".into();
                let err = inner_adapter
                    .intercept_send(unknown, |_req| async {
                        panic!("replay must not touch the transport")
                    })
                    .await
                    .unwrap_err();
                assert!(err.message.contains("/unknown"));
                InboundResponse {
                    status_code: 502,
                    headers: BTreeMap::new(),
                    body: Vec::new(),
                }
            })
            .await;

        let spans = exporter.spans();
        let client = spans.iter().find(|s| s.kind == SpanKind::Client).unwrap();
        assert!(client.status.is_error());
    }

    #[tokio::test]
    async fn background_replay_returns_empty_success() {
        let store = RecordingStore::new();
        let (replay_adapter, exporter) = adapter(Mode::Replay, &store);
        // No server context at all.
        let response = replay_adapter
            .intercept_send(login_request(), |_req| async {
                panic!("replay must not touch the transport")
            })
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);
        assert!(response.body.is_empty());
        assert!(exporter.is_empty());
    }

    #[tokio::test]
    async fn record_reifies_and_reraises_transport_errors() {
        let store = RecordingStore::new();
        let (record_adapter, exporter) = adapter(Mode::Record, &store);
        let inbound = InboundRequest {
            method: "GET".into(),
            url: "/flaky".into(),
            headers: BTreeMap::new(),
            http_version: "1.1".into(),
            body: None,
        };
        let inner_adapter = record_adapter.clone();
        record_adapter
            .handle_server_request(inbound, move || async move {
                let err = inner_adapter
                    .intercept_send(login_request(), |_req| async {
                        Err(ReifiedError::capture("Error", "socket hang up"))
                    })
                    .await
                    .unwrap_err();
                // Unchanged re-raise.
                assert_eq!(err.message, "socket hang up");
                InboundResponse {
                    status_code: 502,
                    headers: BTreeMap::new(),
                    body: Vec::new(),
                }
            })
            .await;

        let spans = exporter.spans();
        let client = spans.iter().find(|s| s.kind == SpanKind::Client).unwrap();
        assert!(client.status.is_error());
        let output = client.output_value.as_ref().unwrap();
        assert_eq!(output["name"], "Error");
        assert_eq!(output["message"], "socket hang up");
    }

    #[tokio::test]
    async fn server_span_adopts_inbound_trace_id() {
        let store = RecordingStore::new();
        let (record_adapter, exporter) = adapter(Mode::Record, &store);
        let inbound = InboundRequest {
            method: "GET".into(),
            url: "https://svc.example.com/users?page=2".into(),
            headers: BTreeMap::from([("X-TD-Trace-Id".into(), "driver-trace".into())]),
            http_version: "1.1".into(),
            body: None,
        };
        record_adapter
            .handle_server_request(inbound, || async {
                InboundResponse {
                    status_code: 200,
                    headers: BTreeMap::new(),
                    body: b"ok".to_vec(),
                }
            })
            .await;

        let spans = exporter.spans();
        let server = spans.iter().find(|s| s.kind == SpanKind::Server).unwrap();
        assert_eq!(server.trace_id.as_str(), "driver-trace");
        assert_eq!(server.name, "/users");
        assert_eq!(server.submodule_name, "GET");
    }

    #[tokio::test]
    async fn dropped_inbound_requests_create_no_span() {
        let store = RecordingStore::new();
        let (record_adapter, exporter) = adapter(Mode::Record, &store);
        let record_adapter =
            record_adapter.with_inbound_drop_check(|req| req.url.starts_with("/healthz"));
        let inbound = InboundRequest {
            method: "GET".into(),
            url: "/healthz".into(),
            headers: BTreeMap::new(),
            http_version: "1.1".into(),
            body: None,
        };
        let response = record_adapter
            .handle_server_request(inbound, || async {
                InboundResponse {
                    status_code: 200,
                    headers: BTreeMap::new(),
                    body: Vec::new(),
                }
            })
            .await;
        assert_eq!(response.status_code, 200);
        assert!(exporter.is_empty());
    }

    #[tokio::test]
    async fn event_style_replay_resolves_from_the_oracle() {
        let store = RecordingStore::new();
        record_login(&store, "trace-ev").await;

        let (replay_adapter, exporter) = adapter(Mode::Replay, &store);
        let frame = ContextFrame::from_inbound_headers(
            Mode::Replay,
            &BTreeMap::from([("x-td-trace-id".to_string(), "trace-ev".to_string())]),
        );

        let (response_body, status) = context::scope(frame, async {
            let options = MockRequestOptions::new("POST", "api.example.com", "/api/auth/login")
                .header("content-type", "application/json");
            let (request, mut events) = replay_adapter.open_replay_request(options);
            request.end(Some(br#"{"email":"u@e.com","password":"p"}"#));

            let mut response = None;
            while let Some(event) = events.recv().await {
                match event {
                    RequestEvent::Response(r) => response = Some(r),
                    RequestEvent::Close => break,
                    _ => {}
                }
            }
            let response = response.expect("response event");
            let status = response.status_code;
            (response.aggregate().await, status)
        })
        .await;

        assert_eq!(status, 200);
        assert_eq!(response_body, br#"{"token":"T"}"#);

        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, SpanKind::Client);
        assert_eq!(spans[0].name, "/api/auth/login");
        assert!(!spans[0].status.is_error());
    }
}
