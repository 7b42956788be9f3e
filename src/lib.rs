// SPDX-License-Identifier: MIT OR Apache-2.0
//! Drift SDK facade.
//!
//! Re-exports the public surface of the workspace crates and wires the
//! standard adapter set to an initialized runtime. Typical embedding:
//!
//! ```no_run
//! use std::sync::Arc;
//! use drift_sdk::{DriftConfig, RecordingStore};
//!
//! let runtime = drift_sdk::init(DriftConfig::new("api-key", "staging")).unwrap();
//! let store = Arc::new(RecordingStore::new());
//! let adapters = drift_sdk::install_adapters(runtime, store);
//! // ... register exporters, mount `adapters.http` at the server seam ...
//! drift_sdk::mark_app_as_ready();
//! # let _ = adapters;
//! ```
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

pub use drift_adapter_graphql::{GraphqlAdapter, OperationType};
pub use drift_adapter_grpc::{GrpcAdapter, GrpcError, GrpcResponse, GrpcStatus, GrpcUnaryCall};
pub use drift_adapter_http::{
    HttpAdapter, InboundRequest, InboundResponse, OutboundRequest, OutboundResponse,
};
pub use drift_adapter_redis::{ConnectionInfo, RedisAdapter, RedisArg, RedisCommandCall, RedisError};
pub use drift_adapter_sql::{SqlAdapter, SqlError, SqlQueryCall};
pub use drift_config::{ConfigError, DriftConfig, DriftRuntime, init, mark_app_as_ready, runtime};
pub use drift_core::{
    Adapter, ActiveSpan, BodyValue, ContextFrame, Mode, ModeGate, PackageType, SpanExporter,
    SpanKernel, SpanKind, SpanProcessor, SpanRecord, SpanStatus, TraceId, context,
};
pub use drift_export::{InMemoryExporter, JsonlExporter};
pub use drift_mock_http::{MockClientRequest, MockRequestOptions, Protocol, RequestEvent};
pub use drift_mock_stream::{QueryEvent, QueryPlayback};
pub use drift_oracle::{MockOracle, MockQuery, MockResult, RecordingStore};
pub use drift_patch::{MethodSlot, PatchRegistry, PatchedModule, SlotFn};
pub use drift_schema::{FieldAnnotation, SchemaMerges};
pub use drift_taxonomy::{DriftFailure, FailureKind, ReifiedError};
pub use drift_transform::{CompiledRuleSet, TransformAction, TransformRule};

/// The standard adapter set, wired and registered.
pub struct AdapterSet {
    /// HTTP server + client adapter.
    pub http: Arc<HttpAdapter>,
    /// Redis command adapter.
    pub redis: Arc<RedisAdapter>,
    /// MySQL-style SQL adapter.
    pub sql: Arc<SqlAdapter>,
    /// gRPC unary client adapter.
    pub grpc: Arc<GrpcAdapter>,
    /// GraphQL presentational adapter.
    pub graphql: GraphqlAdapter,
}

/// Build every bundled adapter against `runtime` and register its patches.
#[must_use]
pub fn install_adapters(runtime: &DriftRuntime, oracle: Arc<dyn MockOracle>) -> AdapterSet {
    let gate = runtime.gate().clone();
    let kernel = runtime.kernel().clone();

    let http = Arc::new(HttpAdapter::new(
        gate.clone(),
        kernel.clone(),
        Arc::clone(&oracle),
    ));
    let redis = Arc::new(RedisAdapter::new(
        gate.clone(),
        kernel.clone(),
        Arc::clone(&oracle),
    ));
    let sql = Arc::new(SqlAdapter::new(
        gate.clone(),
        kernel.clone(),
        Arc::clone(&oracle),
    ));
    let grpc = Arc::new(GrpcAdapter::new(gate, kernel.clone(), oracle));
    let graphql = GraphqlAdapter::new(kernel);

    runtime.registry().register(http.patched_module());
    runtime.registry().register(redis.patched_module());
    runtime.registry().register(sql.patched_module());
    runtime.registry().register(grpc.patched_module());

    tracing::debug!("standard adapter set installed");
    AdapterSet {
        http,
        redis,
        sql,
        grpc,
        graphql,
    }
}
