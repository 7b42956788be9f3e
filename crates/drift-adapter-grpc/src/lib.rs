// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-adapter-grpc
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use drift_core::{
    Adapter, BodyValue, BufferMap, InterceptSpec, InterceptionHandlers, ModeGate, PackageType,
    SpanAttributes, SpanDescriptor, SpanKernel, SpanKind, SpanStatus,
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
use tracing::warn;

/// Package name stamped on gRPC spans.
pub const PACKAGE_NAME: &str = "@grpc/grpc-js";
/// Instrumentation identity stamped on gRPC spans.
pub const INSTRUMENTATION_NAME: &str = "GrpcInstrumentation";

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// Terminal status of a unary call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcStatus {
    /// Status code (`0` is OK).
    pub code: i32,
    /// Status details string.
    pub details: String,
    /// Trailing metadata.
    pub metadata: BTreeMap<String, String>,
}

impl GrpcStatus {
    /// The OK status.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: 0,
            details: String::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// One intercepted unary call.
#[derive(Debug, Clone)]
pub struct GrpcUnaryCall {
    /// Fully-qualified service name.
    pub service: String,
    /// Method name.
    pub method: String,
    /// Request message as a value tree (binary leaves allowed).
    pub body: BodyValue,
    /// Request metadata (excluded from matching).
    pub metadata: BTreeMap<String, String>,
}

/// A successful unary response.
#[derive(Debug, Clone, PartialEq)]
pub struct GrpcResponse {
    /// Response message as a value tree.
    pub body: BodyValue,
    /// Initial metadata.
    pub metadata: BTreeMap<String, String>,
    /// Terminal status (code 0).
    pub status: GrpcStatus,
}

/// Errors shaped like the gRPC library's own: a non-OK status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code} {details}", code = .status.code, details = .status.details)]
pub struct GrpcError {
    /// The non-OK status.
    pub status: GrpcStatus,
}

impl GrpcError {
    fn reify(&self) -> ReifiedError {
        ReifiedError::capture("Error", self.status.details.clone())
            .with_class_tag("grpc_status")
            .with_field("code", json!(self.status.code))
            .with_field("metadata", json!(self.status.metadata))
    }

    fn from_reified(reified: &ReifiedError) -> Self {
        Self {
            status: GrpcStatus {
                code: reified
                    .fields
                    .get("code")
                    .and_then(Value::as_i64)
                    .unwrap_or(2) as i32,
                details: reified.message.clone(),
                metadata: reified
                    .fields
                    .get("metadata")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
            },
        }
    }
}

/// The unary transport the patch wraps, held as a wrappable method slot
/// callable.
pub type GrpcTransport = SlotFn<GrpcUnaryCall, BoxFuture<'static, Result<GrpcResponse, GrpcError>>>;

// ---------------------------------------------------------------------------
// Body encoding: buffers and jsonable strings
// ---------------------------------------------------------------------------

/// A message body encoded for storage: sentinel-bearing JSON plus the two
/// side maps that make the round trip exact.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBody {
    /// JSON form with sentinels at binary leaves and parsed structure at
    /// JSON-bearing string leaves.
    pub json: Value,
    /// Dotted path → base64 original bytes.
    pub buffer_map: BufferMap,
    /// Dotted path → the original string whose parsed form is stored.
    pub jsonable_string_map: BTreeMap<String, String>,
}

/// Encode a body: binary leaves become sentinels (`buffer_map`), string
/// leaves holding serialized JSON objects/arrays are parsed into structure
/// (`jsonable_string_map` keeps the originals byte-exact).
#[must_use]
pub fn encode_body(body: &BodyValue) -> EncodedBody {
    let (json, buffer_map) = body.encode_with_buffers();
    let mut jsonable_string_map = BTreeMap::new();
    let json = promote_jsonable(json, &mut String::new(), &mut jsonable_string_map);
    EncodedBody {
        json,
        buffer_map,
        jsonable_string_map,
    }
}

/// Reconstruct the original tree from the stored form and both side maps.
pub fn decode_body(encoded: &EncodedBody) -> Result<BodyValue, drift_core::ValueError> {
    let demoted = demote_jsonable(
        encoded.json.clone(),
        &mut String::new(),
        &encoded.jsonable_string_map,
    );
    BodyValue::decode_with_buffers(&demoted, &encoded.buffer_map)
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn promote_jsonable(
    value: Value,
    path: &mut String,
    map: &mut BTreeMap<String, String>,
) -> Value {
    match value {
        Value::String(s) => {
            if s.starts_with('{') || s.starts_with('[') {
                if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) =
                    serde_json::from_str::<Value>(&s)
                {
                    map.insert(path.clone(), s);
                    return parsed;
                }
            }
            Value::String(s)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let prev = path.len();
                    let segment = join(path, &i.to_string());
                    path.replace_range(.., &segment);
                    let out = promote_jsonable(item, path, map);
                    path.truncate(prev);
                    out
                })
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| {
                    let prev = path.len();
                    let segment = join(path, &k);
                    path.replace_range(.., &segment);
                    let out = promote_jsonable(v, path, map);
                    path.truncate(prev);
                    (k, out)
                })
                .collect(),
        ),
        other => other,
    }
}

fn demote_jsonable(value: Value, path: &mut String, map: &BTreeMap<String, String>) -> Value {
    if let Some(original) = map.get(path.as_str()) {
        return Value::String(original.clone());
    }
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    let prev = path.len();
                    let segment = join(path, &i.to_string());
                    path.replace_range(.., &segment);
                    let out = demote_jsonable(item, path, map);
                    path.truncate(prev);
                    out
                })
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| {
                    let prev = path.len();
                    let segment = join(path, &k);
                    path.replace_range(.., &segment);
                    let out = demote_jsonable(v, path, map);
                    path.truncate(prev);
                    (k, out)
                })
                .collect(),
        ),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// GrpcAdapter
// ---------------------------------------------------------------------------

/// The gRPC adapter instance.
#[derive(Clone)]
pub struct GrpcAdapter {
    gate: ModeGate,
    kernel: SpanKernel,
    oracle: Arc<dyn MockOracle>,
}

impl Adapter for GrpcAdapter {
    fn package_name(&self) -> &'static str {
        PACKAGE_NAME
    }
    fn instrumentation_name(&self) -> &'static str {
        INSTRUMENTATION_NAME
    }
    fn package_type(&self) -> PackageType {
        PackageType::Grpc
    }
    fn supported_version_req(&self) -> &'static str {
        ">=1.8, <2"
    }
}

impl GrpcAdapter {
    /// Build the adapter against a gate, kernel, and oracle.
    #[must_use]
    pub fn new(gate: ModeGate, kernel: SpanKernel, oracle: Arc<dyn MockOracle>) -> Self {
        Self {
            gate,
            kernel,
            oracle,
        }
    }

    /// The patch registration for this adapter: puts the exports'
    /// [`GrpcTransport`] in a [`MethodSlot`] and wraps it so every unary
    /// call routes through [`Self::intercept_unary`].
    #[must_use]
    pub fn patched_module(self: &Arc<Self>) -> PatchedModule {
        let adapter = Arc::clone(self);
        PatchedModule::new(
            PACKAGE_NAME,
            VersionReq::parse(self.supported_version_req()).expect("static version requirement"),
            Arc::new(move |exports: Exports, _version: Option<&semver::Version>| {
                let Some(transport) = exports.downcast_ref::<GrpcTransport>() else {
                    warn!("grpc exports were not a GrpcTransport; leaving unpatched");
                    return exports;
                };
                let adapter = Arc::clone(&adapter);
                let mut slot = MethodSlot::from_shared("makeUnaryRequest", Arc::clone(transport));
                slot.wrap(move |original| {
                    Arc::new(move |call: GrpcUnaryCall| {
                        let original = Arc::clone(&original);
                        let adapter = Arc::clone(&adapter);
                        Box::pin(async move {
                            adapter.intercept_unary(call, move |c| (original)(c)).await
                        })
                    })
                });
                Arc::new(slot.handle()) as Exports
            }),
        )
    }

    /// Intercept one unary call.
    pub async fn intercept_unary<F, Fut>(
        &self,
        call: GrpcUnaryCall,
        original: F,
    ) -> Result<GrpcResponse, GrpcError>
    where
        F: FnOnce(GrpcUnaryCall) -> Fut + Send,
        Fut: Future<Output = Result<GrpcResponse, GrpcError>> + Send,
    {
        let descriptor = SpanDescriptor::new(
            format!("{}/{}", call.service, call.method),
            call.method.clone(),
            PACKAGE_NAME,
            INSTRUMENTATION_NAME,
            PackageType::Grpc,
            SpanKind::Client,
            input_value(&call),
        );
        let spec = InterceptSpec {
            descriptor,
            is_server_request: false,
            adapter_server_entered: true,
        };
        let handlers = UnaryCall {
            adapter: self,
            call,
            original,
        };
        self.gate.handle_interception(&self.kernel, spec, handlers).await
    }
}

struct UnaryCall<'a, F> {
    adapter: &'a GrpcAdapter,
    call: GrpcUnaryCall,
    original: F,
}

#[async_trait]
impl<'a, F, Fut> InterceptionHandlers<Result<GrpcResponse, GrpcError>> for UnaryCall<'a, F>
where
    F: FnOnce(GrpcUnaryCall) -> Fut + Send,
    Fut: Future<Output = Result<GrpcResponse, GrpcError>> + Send,
{
    async fn call_original(self) -> Result<GrpcResponse, GrpcError> {
        (self.original)(self.call).await
    }

    async fn record(self, span: drift_core::ActiveSpan) -> Result<GrpcResponse, GrpcError> {
        let result = (self.original)(self.call.clone()).await;
        match &result {
            Ok(response) => {
                span.add_attributes(SpanAttributes::output(output_value(response)));
                span.end(SpanStatus::ok());
            }
            Err(error) => {
                let mut output = error.reify().to_output_value();
                output["status"] = json!({
                    "code": error.status.code,
                    "details": error.status.details,
                    "metadata": error.status.metadata,
                });
                span.add_attributes(SpanAttributes::output(output));
                span.end(SpanStatus::error(error.status.details.clone()));
            }
        }
        result
    }

    async fn replay(self, span: drift_core::ActiveSpan) -> Result<GrpcResponse, GrpcError> {
        let query = MockQuery {
            trace_id: span.info().trace_id,
            span_id: span.span_id(),
            name: format!("{}/{}", self.call.service, self.call.method),
            submodule_name: self.call.method.clone(),
            package_name: PACKAGE_NAME.into(),
            instrumentation_name: INSTRUMENTATION_NAME.into(),
            input_value: input_value(&self.call),
            kind: SpanKind::Client,
            stack_trace: None,
        };
        // Metadata churns (deadlines, tracing headers). Everything else
        // participates in matching, including the buffer map, which
        // carries the binary field bytes.
        let merges = SchemaMerges::new().with("metadata", FieldAnnotation::ignored());

        match self.adapter.oracle.find_mock_response(&query, Some(&merges)).await {
            None => {
                let error = GrpcError {
                    status: GrpcStatus {
                        // UNAVAILABLE, as the library reports a dead backend.
                        code: 14,
                        details: format!(
                            "no recorded response for {}/{}",
                            self.call.service, self.call.method
                        ),
                        metadata: BTreeMap::new(),
                    },
                };
                span.end(SpanStatus::error(error.status.details.clone()));
                Err(error)
            }
            Some(hit) => {
                if let Some(reified) = ReifiedError::from_output_value(&hit.result) {
                    span.add_attributes(SpanAttributes::output(hit.result.clone()));
                    span.end(SpanStatus::error(reified.message.clone()));
                    return Err(GrpcError::from_reified(&reified));
                }
                let response = response_from_output(&hit.result);
                span.add_attributes(SpanAttributes::output(hit.result));
                match &response {
                    Ok(_) => span.end(SpanStatus::ok()),
                    Err(error) => span.end(SpanStatus::error(error.status.details.clone())),
                }
                response
            }
        }
    }

    async fn no_op(self) -> Result<GrpcResponse, GrpcError> {
        Ok(GrpcResponse {
            body: BodyValue::Object(Default::default()),
            metadata: BTreeMap::new(),
            status: GrpcStatus::ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// Value shaping
// ---------------------------------------------------------------------------

fn input_value(call: &GrpcUnaryCall) -> Value {
    let encoded = encode_body(&call.body);
    json!({
        "service": call.service,
        "method": call.method,
        "body": encoded.json,
        "metadata": call.metadata,
        "inputMeta": {
            "bufferMap": encoded.buffer_map,
            "jsonableStringMap": encoded.jsonable_string_map,
        },
    })
}

fn output_value(response: &GrpcResponse) -> Value {
    let encoded = encode_body(&response.body);
    json!({
        "body": encoded.json,
        "metadata": response.metadata,
        "status": {
            "code": response.status.code,
            "details": response.status.details,
            "metadata": response.status.metadata,
        },
        "bufferMap": encoded.buffer_map,
        "jsonableStringMap": encoded.jsonable_string_map,
    })
}

fn response_from_output(output: &Value) -> Result<GrpcResponse, GrpcError> {
    let status_value = output.get("status").cloned().unwrap_or(json!({"code": 0}));
    let status = GrpcStatus {
        code: status_value.get("code").and_then(Value::as_i64).unwrap_or(0) as i32,
        details: status_value
            .get("details")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        metadata: status_value
            .get("metadata")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default(),
    };
    if status.code != 0 {
        return Err(GrpcError { status });
    }

    let encoded = EncodedBody {
        json: output.get("body").cloned().unwrap_or(Value::Null),
        buffer_map: output
            .get("bufferMap")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default(),
        jsonable_string_map: output
            .get("jsonableStringMap")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default(),
    };
    let body = decode_body(&encoded).unwrap_or(BodyValue::Null);
    let metadata = output
        .get("metadata")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    Ok(GrpcResponse {
        body,
        metadata,
        status,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
