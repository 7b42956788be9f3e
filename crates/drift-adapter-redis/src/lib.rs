// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-adapter-redis
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use drift_core::{
    Adapter, InterceptSpec, InterceptionHandlers, ModeGate, PackageType, SpanAttributes,
    SpanDescriptor, SpanKernel, SpanKind, SpanStatus,
};
use drift_oracle::{MockOracle, MockQuery};
use drift_patch::{Exports, MethodSlot, PatchedModule, SlotFn};
use drift_schema::{FieldAnnotation, SchemaMerges};
use drift_taxonomy::ReifiedError;
use futures::future::BoxFuture;
use semver::VersionReq;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

/// Package name stamped on Redis spans.
pub const PACKAGE_NAME: &str = "ioredis";
/// Instrumentation identity stamped on Redis spans.
pub const INSTRUMENTATION_NAME: &str = "RedisInstrumentation";

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// One argument of a Redis command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisArg {
    /// UTF-8 argument (the common case).
    Text(String),
    /// Binary argument; stored base64 with an encoding annotation.
    Binary(Vec<u8>),
}

/// Where the command was headed.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Selected database index.
    pub db: u32,
}

/// One intercepted command invocation.
#[derive(Debug, Clone)]
pub struct RedisCommandCall {
    /// Command name, lower-cased (`"hgetall"`).
    pub command: String,
    /// Arguments in wire order.
    pub args: Vec<RedisArg>,
    /// Connection coordinates (excluded from matching).
    pub connection: ConnectionInfo,
}

/// Errors shaped like the Redis library's own.
///
/// Class identity survives recording: a replayed `ReplyError` is still a
/// `ReplyError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RedisError {
    /// The server answered with an error reply.
    #[error("ReplyError: {message}")]
    Reply {
        /// The server's error line.
        message: String,
    },
    /// The connection failed.
    #[error("Error: {message}")]
    Connection {
        /// Failure description.
        message: String,
    },
}

impl RedisError {
    const REPLY_TAG: &'static str = "reply_error";
    const CONNECTION_TAG: &'static str = "connection_error";

    fn reify(&self) -> ReifiedError {
        match self {
            Self::Reply { message } => ReifiedError::capture("ReplyError", message.clone())
                .with_class_tag(Self::REPLY_TAG),
            Self::Connection { message } => {
                ReifiedError::capture("Error", message.clone()).with_class_tag(Self::CONNECTION_TAG)
            }
        }
    }

    fn from_reified(reified: &ReifiedError) -> Self {
        match reified.class_tag.as_deref() {
            Some(Self::REPLY_TAG) => Self::Reply {
                message: reified.message.clone(),
            },
            _ => Self::Connection {
                message: reified.message.clone(),
            },
        }
    }
}

/// The command transport the patch wraps, held as a wrappable method slot
/// callable.
pub type RedisTransport = SlotFn<RedisCommandCall, BoxFuture<'static, Result<Value, RedisError>>>;

// ---------------------------------------------------------------------------
// RedisAdapter
// ---------------------------------------------------------------------------

/// The Redis adapter instance.
#[derive(Clone)]
pub struct RedisAdapter {
    gate: ModeGate,
    kernel: SpanKernel,
    oracle: Arc<dyn MockOracle>,
}

impl Adapter for RedisAdapter {
    fn package_name(&self) -> &'static str {
        PACKAGE_NAME
    }
    fn instrumentation_name(&self) -> &'static str {
        INSTRUMENTATION_NAME
    }
    fn package_type(&self) -> PackageType {
        PackageType::Redis
    }
    fn supported_version_req(&self) -> &'static str {
        ">=4, <6"
    }
}

impl RedisAdapter {
    /// Build the adapter against a gate, kernel, and oracle.
    #[must_use]
    pub fn new(gate: ModeGate, kernel: SpanKernel, oracle: Arc<dyn MockOracle>) -> Self {
        Self {
            gate,
            kernel,
            oracle,
        }
    }

    /// The patch registration for this adapter: wraps a [`RedisTransport`]
    /// exports value so every command routes through
    /// [`Self::intercept_command`]. Also covers the library's internal
    /// pipeline file, which constructs commands without going through the
    /// public entry point.
    #[must_use]
    pub fn patched_module(self: &Arc<Self>) -> PatchedModule {
        let supported =
            VersionReq::parse(self.supported_version_req()).expect("static version requirement");
        let patch = self.transport_patch();
        PatchedModule::new(PACKAGE_NAME, supported.clone(), patch.clone())
            .with_file_patch("built/Pipeline.js", supported, patch)
    }

    fn transport_patch(
        self: &Arc<Self>,
    ) -> Arc<dyn Fn(Exports, Option<&semver::Version>) -> Exports + Send + Sync> {
        let adapter = Arc::clone(self);
        Arc::new(move |exports: Exports, _version: Option<&semver::Version>| {
            let Some(transport) = exports.downcast_ref::<RedisTransport>() else {
                warn!("ioredis exports were not a RedisTransport; leaving unpatched");
                return exports;
            };
            let adapter = Arc::clone(&adapter);
            let mut slot = MethodSlot::from_shared("sendCommand", Arc::clone(transport));
            slot.wrap(move |original| {
                Arc::new(move |call: RedisCommandCall| {
                    let original = Arc::clone(&original);
                    let adapter = Arc::clone(&adapter);
                    Box::pin(async move {
                        adapter.intercept_command(call, move |c| (original)(c)).await
                    })
                })
            });
            Arc::new(slot.handle()) as Exports
        })
    }

    /// Intercept one command.
    ///
    /// The returned value is the post-transformation value the library
    /// itself yields for the command (`HGETALL` → object, `GET` → string
    /// or null), in both record and replay.
    pub async fn intercept_command<F, Fut>(
        &self,
        call: RedisCommandCall,
        original: F,
    ) -> Result<Value, RedisError>
    where
        F: FnOnce(RedisCommandCall) -> Fut + Send,
        Fut: Future<Output = Result<Value, RedisError>> + Send,
    {
        let descriptor = SpanDescriptor::new(
            format!("{PACKAGE_NAME}.{}", call.command),
            call.command.clone(),
            PACKAGE_NAME,
            INSTRUMENTATION_NAME,
            PackageType::Redis,
            SpanKind::Client,
            input_value(&call),
        );
        let spec = InterceptSpec {
            descriptor,
            is_server_request: false,
            adapter_server_entered: true,
        };
        let handlers = CommandCall {
            adapter: self,
            call,
            original,
        };
        self.gate.handle_interception(&self.kernel, spec, handlers).await
    }
}

struct CommandCall<'a, F> {
    adapter: &'a RedisAdapter,
    call: RedisCommandCall,
    original: F,
}

#[async_trait]
impl<'a, F, Fut> InterceptionHandlers<Result<Value, RedisError>> for CommandCall<'a, F>
where
    F: FnOnce(RedisCommandCall) -> Fut + Send,
    Fut: Future<Output = Result<Value, RedisError>> + Send,
{
    async fn call_original(self) -> Result<Value, RedisError> {
        (self.original)(self.call).await
    }

    async fn record(self, span: drift_core::ActiveSpan) -> Result<Value, RedisError> {
        let result = (self.original)(self.call.clone()).await;
        match &result {
            Ok(value) => {
                span.add_attributes(SpanAttributes::output(json!({"value": value})));
                span.end(SpanStatus::ok());
            }
            Err(error) => {
                let reified = error.reify();
                span.add_attributes(SpanAttributes::output(reified.to_output_value()));
                span.end(SpanStatus::error(reified.message.clone()));
            }
        }
        result
    }

    async fn replay(self, span: drift_core::ActiveSpan) -> Result<Value, RedisError> {
        let query = MockQuery {
            trace_id: span.info().trace_id,
            span_id: span.span_id(),
            name: format!("{PACKAGE_NAME}.{}", self.call.command),
            submodule_name: self.call.command.clone(),
            package_name: PACKAGE_NAME.into(),
            instrumentation_name: INSTRUMENTATION_NAME.into(),
            input_value: input_value(&self.call),
            kind: SpanKind::Client,
            stack_trace: None,
        };
        let merges = merges_for(&self.call);

        match self.adapter.oracle.find_mock_response(&query, Some(&merges)).await {
            None => {
                let error = RedisError::Connection {
                    message: format!("no recorded response for command {}", self.call.command),
                };
                span.end(SpanStatus::error(error.to_string()));
                Err(error)
            }
            Some(hit) => {
                if let Some(reified) = ReifiedError::from_output_value(&hit.result) {
                    span.add_attributes(SpanAttributes::output(hit.result.clone()));
                    span.end(SpanStatus::error(reified.message.clone()));
                    return Err(RedisError::from_reified(&reified));
                }
                let value = hit.result.get("value").cloned().unwrap_or(Value::Null);
                span.add_attributes(SpanAttributes::output(hit.result));
                span.end(SpanStatus::ok());
                Ok(value)
            }
        }
    }

    async fn no_op(self) -> Result<Value, RedisError> {
        Ok(empty_success(&self.call.command))
    }
}

// ---------------------------------------------------------------------------
// Value shaping
// ---------------------------------------------------------------------------

fn input_value(call: &RedisCommandCall) -> Value {
    let args: Vec<Value> = call
        .args
        .iter()
        .map(|arg| match arg {
            RedisArg::Text(s) => json!(s),
            RedisArg::Binary(bytes) => json!(BASE64.encode(bytes)),
        })
        .collect();
    json!({
        "command": call.command,
        "args": args,
        "connectionInfo": {
            "host": call.connection.host,
            "port": call.connection.port,
            "db": call.connection.db,
        },
    })
}

/// Connection coordinates differ between recording and replay hosts, so
/// they never participate in matching; binary args are annotated so the
/// oracle compares decoded bytes.
fn merges_for(call: &RedisCommandCall) -> SchemaMerges {
    let mut merges = SchemaMerges::new().with("connectionInfo", FieldAnnotation::ignored());
    for (index, arg) in call.args.iter().enumerate() {
        if matches!(arg, RedisArg::Binary(_)) {
            merges = merges.with(
                format!("args.{index}"),
                FieldAnnotation::base64("application/octet-stream"),
            );
        }
    }
    merges
}

/// The natural empty success for a command, used for background replay
/// calls that must never touch the network.
#[must_use]
pub fn empty_success(command: &str) -> Value {
    match command {
        "get" | "hget" | "lpop" | "rpop" | "spop" | "getdel" => Value::Null,
        "hgetall" | "config" => json!({}),
        "keys" | "lrange" | "smembers" | "mget" | "hkeys" | "hvals" | "zrange" => json!([]),
        "set" | "mset" | "hmset" | "flushall" | "flushdb" | "select" | "auth" | "quit" => {
            json!("OK")
        }
        "del" | "exists" | "expire" | "ttl" | "incr" | "decr" | "llen" | "scard" | "hlen"
        | "sadd" | "srem" | "zadd" | "zrem" | "hset" | "hdel" | "lpush" | "rpush" => json!(0),
        "ping" => json!("PONG"),
        _ => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
