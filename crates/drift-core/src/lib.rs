// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Adapter contract every library-specific interceptor implements.
pub mod adapter;
/// Execution context propagation across asynchronous continuations.
pub mod context;
/// Span export trait and export errors.
pub mod export;
/// Trace and span identifiers.
pub mod ids;
/// Span kernel: creation, mutation, exactly-once end, export fan-out.
pub mod kernel;
/// Mode gate: the single RECORD / REPLAY / DISABLED decision point.
pub mod mode;
/// Span data model.
pub mod span;
/// Body value tree with binary leaves and side-map encoding.
pub mod value;

pub use adapter::Adapter;
pub use context::{ContextFrame, SpanInfo};
pub use export::{ExportError, SpanExporter, SpanProcessor};
pub use ids::{SpanId, TraceId};
pub use kernel::{ActiveSpan, SpanKernel};
pub use mode::{InterceptSpec, InterceptionHandlers, Mode, ModeGate};
pub use span::{
    PackageType, SpanAttributes, SpanDescriptor, SpanKind, SpanRecord, SpanStatus, SpanTiming,
    StatusCode, TransformActionRecord,
};
pub use value::{BUFFER_SENTINEL, BodyValue, BufferMap, ValueError};

/// Inbound header carrying the trace id to adopt verbatim.
pub const TRACE_ID_HEADER: &str = "x-td-trace-id";

/// Inbound header carrying a JSON environment-variable snapshot.
pub const ENV_VARS_HEADER: &str = "x-td-env-vars";

/// Environment variable selecting the SDK mode.
pub const MODE_ENV_VAR: &str = "TUSK_DRIFT_MODE";
