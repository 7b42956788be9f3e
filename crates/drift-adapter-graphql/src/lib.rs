// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-adapter-graphql
#![deny(unsafe_code)]
#![warn(missing_docs)]

use drift_core::{Adapter, PackageType, SpanAttributes, SpanKernel, context};
use serde_json::json;
use tracing::debug;

/// Package name the adapter declares.
pub const PACKAGE_NAME: &str = "graphql";
/// Instrumentation identity the adapter declares.
pub const INSTRUMENTATION_NAME: &str = "GraphqlInstrumentation";

/// The GraphQL operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// A read.
    Query,
    /// A write.
    Mutation,
    /// A streaming subscription.
    Subscription,
}

impl OperationType {
    /// Lower-case label (`"query"`).
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

/// The GraphQL adapter instance.
#[derive(Clone)]
pub struct GraphqlAdapter {
    kernel: SpanKernel,
}

impl Adapter for GraphqlAdapter {
    fn package_name(&self) -> &'static str {
        PACKAGE_NAME
    }
    fn instrumentation_name(&self) -> &'static str {
        INSTRUMENTATION_NAME
    }
    fn package_type(&self) -> PackageType {
        PackageType::Graphql
    }
    fn supported_version_req(&self) -> &'static str {
        ">=15, <17"
    }
}

impl GraphqlAdapter {
    /// Build the adapter against a kernel.
    #[must_use]
    pub fn new(kernel: SpanKernel) -> Self {
        Self { kernel }
    }

    /// Annotate the enclosing server span with the executing operation.
    ///
    /// Renames the span to `<type>.<name>` (or just the type for anonymous
    /// operations) and stamps the operation metadata onto its input value.
    /// Outside any span this is a no-op.
    pub fn annotate_operation(&self, operation_type: OperationType, operation_name: Option<&str>) {
        let Some(current) = context::current_span_info() else {
            debug!("graphql execution outside any span; nothing to annotate");
            return;
        };
        let name = match operation_name {
            Some(name) => format!("{}.{name}", operation_type.label()),
            None => operation_type.label().to_string(),
        };
        let mut patch = serde_json::Map::new();
        patch.insert(
            "graphqlOperationType".into(),
            json!(operation_type.label()),
        );
        if let Some(op_name) = operation_name {
            patch.insert("graphqlOperationName".into(), json!(op_name));
        }
        self.kernel.add_attributes_by_id(
            current.span_id,
            SpanAttributes {
                name: Some(name),
                input_patch: Some(patch),
                ..SpanAttributes::default()
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_core::{
        ContextFrame, Mode, SpanDescriptor, SpanKind, SpanStatus,
    };
    use drift_export::InMemoryExporter;
    use pretty_assertions::assert_eq;

    fn server_descriptor() -> SpanDescriptor {
        SpanDescriptor::new(
            "/graphql",
            "POST",
            "http",
            "HttpInstrumentation",
            PackageType::Http,
            SpanKind::Server,
            serde_json::json!({"method": "POST", "url": "/graphql"}),
        )
    }

    #[tokio::test]
    async fn annotates_the_enclosing_server_span() {
        let kernel = SpanKernel::new();
        let exporter = InMemoryExporter::new();
        kernel.register_exporter(Box::new(exporter.clone()));
        let adapter = GraphqlAdapter::new(kernel.clone());
        let frame = ContextFrame::background(Mode::Record);

        kernel
            .create_and_execute_span(&frame, false, server_descriptor(), |span| async move {
                adapter.annotate_operation(OperationType::Query, Some("getUser"));
                span.end(SpanStatus::ok());
            })
            .await;

        let spans = exporter.spans();
        assert_eq!(spans[0].name, "query.getUser");
        assert_eq!(spans[0].input_value["graphqlOperationType"], "query");
        assert_eq!(spans[0].input_value["graphqlOperationName"], "getUser");
        // The original request fields survive the patch.
        assert_eq!(spans[0].input_value["url"], "/graphql");
    }

    #[tokio::test]
    async fn anonymous_operations_use_the_bare_type() {
        let kernel = SpanKernel::new();
        let exporter = InMemoryExporter::new();
        kernel.register_exporter(Box::new(exporter.clone()));
        let adapter = GraphqlAdapter::new(kernel.clone());
        let frame = ContextFrame::background(Mode::Record);

        kernel
            .create_and_execute_span(&frame, false, server_descriptor(), |span| async move {
                adapter.annotate_operation(OperationType::Mutation, None);
                span.end(SpanStatus::ok());
            })
            .await;

        assert_eq!(exporter.spans()[0].name, "mutation");
    }

    #[tokio::test]
    async fn outside_any_span_is_a_no_op() {
        let kernel = SpanKernel::new();
        let adapter = GraphqlAdapter::new(kernel);
        // Must not panic or create spans.
        adapter.annotate_operation(OperationType::Query, Some("x"));
    }
}
