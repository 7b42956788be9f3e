// SPDX-License-Identifier: MIT OR Apache-2.0
//! Span export trait and export errors.

use crate::span::SpanRecord;

/// Errors an export adapter may report.
///
/// The kernel catches these, logs them, and continues with the next
/// exporter; they never reach host code.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Serialization of the span failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The export destination failed.
    #[error("export destination failed: {0}")]
    Io(String),
}

/// A destination for ended spans.
///
/// Exporters receive spans in the order they ended, after the processor
/// chain has run. Implementations must not block the event loop for long;
/// buffering and background flushing belong inside the exporter.
pub trait SpanExporter: Send + Sync {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Deliver one ended span.
    fn export(&self, span: &SpanRecord) -> Result<(), ExportError>;
}

/// A transformation step run between span end and export.
///
/// The transform engine registers itself as a processor. Processors run in
/// registration order; each receives the previous one's output.
pub trait SpanProcessor: Send + Sync {
    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Transform one ended span.
    fn process(&self, span: SpanRecord) -> SpanRecord;
}
