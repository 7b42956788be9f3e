// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-adapter-sql
#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use drift_core::{
    Adapter, InterceptSpec, InterceptionHandlers, ModeGate, PackageType, SpanAttributes,
    SpanDescriptor, SpanKernel, SpanKind, SpanStatus,
};
use drift_mock_stream::{CompletionCallback, QueryPlayback, RecordedResultSet, RecordedStatement};
use drift_oracle::{MockOracle, MockQuery};
use drift_patch::{Exports, MethodSlot, PatchedModule, SlotFn};
use drift_schema::{FieldAnnotation, SchemaMerges};
use drift_taxonomy::ReifiedError;
use futures::future::BoxFuture;
use semver::VersionReq;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

/// Package name stamped on SQL spans.
pub const PACKAGE_NAME: &str = "mysql2";
/// Instrumentation identity stamped on SQL spans.
pub const INSTRUMENTATION_NAME: &str = "MysqlInstrumentation";

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// One intercepted query.
#[derive(Debug, Clone)]
pub struct SqlQueryCall {
    /// The SQL text (possibly multi-statement).
    pub sql: String,
    /// Bind values, when the call used placeholders.
    pub values: Option<Vec<Value>>,
    /// Driver options bag (`rowsAsArray` and friends).
    pub options: Option<Value>,
}

impl SqlQueryCall {
    /// A plain text query.
    #[must_use]
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: None,
            options: None,
        }
    }

    /// Attach bind values.
    #[must_use]
    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = Some(values);
        self
    }
}

/// Errors shaped like the driver's own.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct SqlError {
    /// Driver error code (`"ER_PARSE_ERROR"`, `"ECONNREFUSED"`...).
    pub code: String,
    /// Error message.
    pub message: String,
}

impl SqlError {
    fn reify(&self) -> ReifiedError {
        ReifiedError::capture("Error", self.message.clone())
            .with_class_tag("sql_error")
            .with_field("code", json!(self.code))
    }

    fn from_reified(reified: &ReifiedError) -> Self {
        Self {
            code: reified
                .fields
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string(),
            message: reified.message.clone(),
        }
    }
}

/// The query transport the patch wraps, held as a wrappable method slot
/// callable: executes the SQL for real and returns the full per-statement
/// result structure.
pub type SqlTransport =
    SlotFn<SqlQueryCall, BoxFuture<'static, Result<RecordedResultSet, SqlError>>>;

// ---------------------------------------------------------------------------
// SqlAdapter
// ---------------------------------------------------------------------------

/// The SQL adapter instance.
#[derive(Clone)]
pub struct SqlAdapter {
    gate: ModeGate,
    kernel: SpanKernel,
    oracle: Arc<dyn MockOracle>,
}

impl Adapter for SqlAdapter {
    fn package_name(&self) -> &'static str {
        PACKAGE_NAME
    }
    fn instrumentation_name(&self) -> &'static str {
        INSTRUMENTATION_NAME
    }
    fn package_type(&self) -> PackageType {
        PackageType::Mysql
    }
    fn supported_version_req(&self) -> &'static str {
        ">=2, <4"
    }
}

impl SqlAdapter {
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
    /// [`SqlTransport`] in a [`MethodSlot`] and wraps it so every query
    /// routes through [`Self::intercept_query`].
    #[must_use]
    pub fn patched_module(self: &Arc<Self>) -> PatchedModule {
        let adapter = Arc::clone(self);
        PatchedModule::new(
            PACKAGE_NAME,
            VersionReq::parse(self.supported_version_req()).expect("static version requirement"),
            Arc::new(move |exports: Exports, _version: Option<&semver::Version>| {
                let Some(transport) = exports.downcast_ref::<SqlTransport>() else {
                    warn!("mysql2 exports were not a SqlTransport; leaving unpatched");
                    return exports;
                };
                let adapter = Arc::clone(&adapter);
                let mut slot = MethodSlot::from_shared("query", Arc::clone(transport));
                slot.wrap(move |original| {
                    Arc::new(move |call: SqlQueryCall| {
                        let original = Arc::clone(&original);
                        let adapter = Arc::clone(&adapter);
                        Box::pin(async move {
                            adapter.intercept_query(call, move |c| (original)(c)).await
                        })
                    })
                });
                Arc::new(slot.handle()) as Exports
            }),
        )
    }

    /// Intercept a promise-style query: the full result structure back.
    pub async fn intercept_query<F, Fut>(
        &self,
        call: SqlQueryCall,
        original: F,
    ) -> Result<RecordedResultSet, SqlError>
    where
        F: FnOnce(SqlQueryCall) -> Fut + Send,
        Fut: Future<Output = Result<RecordedResultSet, SqlError>> + Send,
    {
        let spec = self.spec_for(&call);
        let handlers = QueryCall {
            adapter: self,
            call,
            original,
        };
        self.gate.handle_interception(&self.kernel, spec, handlers).await
    }

    /// Intercept a streaming query: events in statement order plus the
    /// awaitable aggregate, in every mode.
    pub async fn intercept_query_streaming<F, Fut>(
        &self,
        call: SqlQueryCall,
        original: F,
        callback: Option<CompletionCallback>,
    ) -> QueryPlayback
    where
        F: FnOnce(SqlQueryCall) -> Fut + Send,
        Fut: Future<Output = Result<RecordedResultSet, SqlError>> + Send,
    {
        match self.intercept_query(call, original).await {
            Ok(recorded) => QueryPlayback::start(recorded, callback),
            Err(error) => {
                // Surface the failure through the same event protocol the
                // driver uses: error event, node-style callback, end.
                let failed = RecordedResultSet {
                    statements: Vec::new(),
                    err_query_index: Some(0),
                    error: Some(error.reify()),
                };
                QueryPlayback::start(failed, callback)
            }
        }
    }

    fn spec_for(&self, call: &SqlQueryCall) -> InterceptSpec {
        let summary = statement_summary(&call.sql);
        InterceptSpec {
            descriptor: SpanDescriptor::new(
                format!("{PACKAGE_NAME}.query"),
                summary,
                PACKAGE_NAME,
                INSTRUMENTATION_NAME,
                PackageType::Mysql,
                SpanKind::Client,
                input_value(call),
            ),
            is_server_request: false,
            adapter_server_entered: true,
        }
    }
}

/// First keyword of the first statement, upper-cased (`"SELECT"`).
fn statement_summary(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|word| word.to_ascii_uppercase())
        .unwrap_or_else(|| "QUERY".into())
}

struct QueryCall<'a, F> {
    adapter: &'a SqlAdapter,
    call: SqlQueryCall,
    original: F,
}

#[async_trait]
impl<'a, F, Fut> InterceptionHandlers<Result<RecordedResultSet, SqlError>> for QueryCall<'a, F>
where
    F: FnOnce(SqlQueryCall) -> Fut + Send,
    Fut: Future<Output = Result<RecordedResultSet, SqlError>> + Send,
{
    async fn call_original(self) -> Result<RecordedResultSet, SqlError> {
        (self.original)(self.call).await
    }

    async fn record(self, span: drift_core::ActiveSpan) -> Result<RecordedResultSet, SqlError> {
        let result = (self.original)(self.call.clone()).await;
        match &result {
            Ok(recorded) => {
                span.add_attributes(SpanAttributes::output(encode_output(recorded)));
                match &recorded.error {
                    Some(error) => span.end(SpanStatus::error(error.message.clone())),
                    None => span.end(SpanStatus::ok()),
                }
            }
            Err(error) => {
                let reified = error.reify();
                span.add_attributes(SpanAttributes::output(reified.to_output_value()));
                span.end(SpanStatus::error(reified.message.clone()));
            }
        }
        result
    }

    async fn replay(self, span: drift_core::ActiveSpan) -> Result<RecordedResultSet, SqlError> {
        let query = MockQuery {
            trace_id: span.info().trace_id,
            span_id: span.span_id(),
            name: format!("{PACKAGE_NAME}.query"),
            submodule_name: statement_summary(&self.call.sql),
            package_name: PACKAGE_NAME.into(),
            instrumentation_name: INSTRUMENTATION_NAME.into(),
            input_value: input_value(&self.call),
            kind: SpanKind::Client,
            stack_trace: None,
        };
        let merges = SchemaMerges::new().with("options", FieldAnnotation::ignored());

        match self.adapter.oracle.find_mock_response(&query, Some(&merges)).await {
            None => {
                let error = SqlError {
                    code: "DRIFT_NO_RECORDING".into(),
                    message: format!("no recorded result for query: {}", self.call.sql),
                };
                span.end(SpanStatus::error(error.message.clone()));
                Err(error)
            }
            Some(hit) => {
                if let Some(reified) = ReifiedError::from_output_value(&hit.result) {
                    span.add_attributes(SpanAttributes::output(hit.result.clone()));
                    span.end(SpanStatus::error(reified.message.clone()));
                    return Err(SqlError::from_reified(&reified));
                }
                let recorded = decode_output(&hit.result);
                span.add_attributes(SpanAttributes::output(hit.result));
                match &recorded.error {
                    Some(error) => span.end(SpanStatus::error(error.message.clone())),
                    None => span.end(SpanStatus::ok()),
                }
                Ok(recorded)
            }
        }
    }

    async fn no_op(self) -> Result<RecordedResultSet, SqlError> {
        Ok(empty_result_set())
    }
}

/// The empty row set background replay calls resolve to.
#[must_use]
pub fn empty_result_set() -> RecordedResultSet {
    RecordedResultSet {
        statements: vec![RecordedStatement::default()],
        err_query_index: None,
        error: None,
    }
}

// ---------------------------------------------------------------------------
// Value shaping
// ---------------------------------------------------------------------------

fn input_value(call: &SqlQueryCall) -> Value {
    let mut input = json!({"sql": call.sql});
    if let Some(values) = &call.values {
        input["values"] = json!(values);
    }
    if let Some(options) = &call.options {
        input["options"] = options.clone();
    }
    input
}

/// Encode a result structure into the stored output shape: flat arrays for
/// single statements, per-statement arrays (plus `queryCount`) otherwise.
#[must_use]
pub fn encode_output(recorded: &RecordedResultSet) -> Value {
    if let Some(error) = &recorded.error {
        let mut output = json!({"error": error.to_output_value()});
        if let Some(index) = recorded.err_query_index {
            output["errQueryIndex"] = json!(index);
        }
        return output;
    }
    let aggregate = recorded.aggregate();
    json!({
        "results": aggregate.results,
        "fields": aggregate.fields,
        "queryCount": recorded.statements.len(),
    })
}

/// Decode the stored output shape back into the per-statement structure.
#[must_use]
pub fn decode_output(output: &Value) -> RecordedResultSet {
    if let Some(error) = output.get("error") {
        return RecordedResultSet {
            statements: Vec::new(),
            err_query_index: output
                .get("errQueryIndex")
                .and_then(Value::as_u64)
                .map(|i| i as usize),
            error: ReifiedError::from_output_value(error),
        };
    }

    let query_count = output
        .get("queryCount")
        .and_then(Value::as_u64)
        .unwrap_or(1) as usize;
    let results = output.get("results").cloned().unwrap_or(json!([]));
    let fields = output.get("fields").cloned().unwrap_or(json!([]));

    let statements = if query_count <= 1 {
        vec![RecordedStatement {
            rows: as_array(&results),
            fields: as_array(&fields),
        }]
    } else {
        let rows_per = as_array(&results);
        let fields_per = as_array(&fields);
        (0..query_count)
            .map(|i| RecordedStatement {
                rows: rows_per.get(i).map(as_array).unwrap_or_default(),
                fields: fields_per.get(i).map(as_array).unwrap_or_default(),
            })
            .collect()
    };
    RecordedResultSet {
        statements,
        err_query_index: None,
        error: None,
    }
}

fn as_array(value: &Value) -> Vec<Value> {
    value.as_array().cloned().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
