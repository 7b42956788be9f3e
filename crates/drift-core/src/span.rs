// SPDX-License-Identifier: MIT OR Apache-2.0
//! Span data model.
//!
//! A span records one observed operation: an inbound server request, an
//! outbound client call, or an internal step. Input is fixed at creation;
//! output and status are set exactly once at end; a span is only exported
//! after it has ended.

use crate::ids::{SpanId, TraceId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which side of a call the span observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Inbound request handled by the host.
    Server,
    /// Outbound call made by the host.
    Client,
    /// Host-internal operation.
    Internal,
}

/// Coarse tag for the library family behind a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    /// HTTP client or server.
    Http,
    /// gRPC unary client.
    Grpc,
    /// Redis command interface.
    Redis,
    /// MySQL-style SQL driver.
    Mysql,
    /// GraphQL execution metadata.
    Graphql,
    /// Anything else.
    #[default]
    Unspecified,
}

/// Terminal outcome of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// The operation completed normally.
    Ok,
    /// The operation failed.
    Error,
}

/// Status plus optional human-readable message, set once at span end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SpanStatus {
    /// Outcome code.
    pub code: StatusCode,
    /// Optional message (error description, usually).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SpanStatus {
    /// Successful completion.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: None,
        }
    }

    /// Failed completion with a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            message: Some(message.into()),
        }
    }

    /// Whether this is an error status.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code == StatusCode::Error
    }
}

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Wall-clock start/end plus a monotonic duration.
///
/// The duration is measured with a monotonic clock, so it is immune to
/// wall-clock adjustments between start and end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SpanTiming {
    /// Wall-clock start.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end; `None` until the span ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Monotonic duration in microseconds; `None` until the span ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_micros: Option<u64>,
}

impl SpanTiming {
    /// Timing for a span that just started.
    #[must_use]
    pub fn started_now() -> Self {
        Self {
            started_at: Utc::now(),
            ended_at: None,
            duration_micros: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transform metadata
// ---------------------------------------------------------------------------

/// One transform action applied to a span before export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransformActionRecord {
    /// Action type (`"redact"`, `"mask"`, `"replace"`, `"drop"`).
    pub action: String,
    /// The field the action targeted (e.g. `"jsonPath:$.password"`).
    pub field: String,
    /// Why the rule fired (rule description or matcher summary).
    pub reason: String,
}

// ---------------------------------------------------------------------------
// SpanRecord
// ---------------------------------------------------------------------------

/// The self-contained exported form of a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpanRecord {
    /// Unique span id.
    pub span_id: SpanId,
    /// Trace id shared across all spans of one inbound request.
    pub trace_id: TraceId,
    /// Parent span, when one was current at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Server / client / internal.
    pub kind: SpanKind,
    /// Library family tag.
    pub package_type: PackageType,
    /// Package the adapter instruments (e.g. `"ioredis"`).
    pub package_name: String,
    /// Name of the instrumentation that produced the span.
    pub instrumentation_name: String,
    /// Command or method within the package (e.g. `"hgetall"`).
    pub submodule_name: String,
    /// Logical operation name (e.g. `"ioredis.get"` or a URL path).
    pub name: String,
    /// Adapter-shaped input, encoded for storage.
    pub input_value: serde_json::Value,
    /// Adapter-shaped output, filled at end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_value: Option<serde_json::Value>,
    /// Terminal status.
    pub status: SpanStatus,
    /// Wall-clock and monotonic timing.
    pub timing: SpanTiming,
    /// Whether the span was created before the app declared readiness.
    #[serde(default)]
    pub is_pre_app_start: bool,
    /// When set, child operations under this span are not recorded.
    #[serde(default)]
    pub stop_recording_child_spans: bool,
    /// Call-site stack trace, when captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Transform actions applied before export; absent when untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_actions: Option<Vec<TransformActionRecord>>,
}

// ---------------------------------------------------------------------------
// SpanDescriptor / SpanAttributes
// ---------------------------------------------------------------------------

/// Everything an adapter supplies to open a span.
#[derive(Debug, Clone)]
pub struct SpanDescriptor {
    /// Logical operation name.
    pub name: String,
    /// Command or method within the package.
    pub submodule_name: String,
    /// Package the adapter instruments.
    pub package_name: String,
    /// Instrumentation identity.
    pub instrumentation_name: String,
    /// Library family tag.
    pub package_type: PackageType,
    /// Server / client / internal.
    pub kind: SpanKind,
    /// Adapter-shaped input, already encoded for storage.
    pub input_value: serde_json::Value,
    /// Call-site stack trace, when the adapter captures one.
    pub stack_trace: Option<String>,
    /// Suppress recording of child operations under this span.
    pub stop_recording_child_spans: bool,
}

impl SpanDescriptor {
    /// Descriptor with the required identity fields; the rest default off.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        submodule_name: impl Into<String>,
        package_name: impl Into<String>,
        instrumentation_name: impl Into<String>,
        package_type: PackageType,
        kind: SpanKind,
        input_value: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            submodule_name: submodule_name.into(),
            package_name: package_name.into(),
            instrumentation_name: instrumentation_name.into(),
            package_type,
            kind,
            input_value,
            stack_trace: None,
            stop_recording_child_spans: false,
        }
    }
}

/// Partial update applied to a live span via the kernel.
///
/// Only present fields are touched.
#[derive(Debug, Clone, Default)]
pub struct SpanAttributes {
    /// Replace the logical name.
    pub name: Option<String>,
    /// Replace the submodule.
    pub submodule_name: Option<String>,
    /// Replace the input value wholesale.
    pub input_value: Option<serde_json::Value>,
    /// Shallow-merge these fields into the input value when both are
    /// objects (GraphQL enrichment adds operation metadata this way).
    pub input_patch: Option<serde_json::Map<String, serde_json::Value>>,
    /// Set the output value.
    pub output_value: Option<serde_json::Value>,
}

impl SpanAttributes {
    /// Attribute set carrying just an output value.
    #[must_use]
    pub fn output(value: serde_json::Value) -> Self {
        Self {
            output_value: Some(value),
            ..Self::default()
        }
    }
}
