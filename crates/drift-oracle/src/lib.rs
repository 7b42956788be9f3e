// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-oracle
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Field-by-field input comparison honoring schema annotations.
pub mod matching;
/// The in-memory recorded-span store.
pub mod store;

use async_trait::async_trait;
use drift_core::{SpanId, SpanKind, TraceId};
use serde::{Deserialize, Serialize};

pub use store::RecordingStore;

// ---------------------------------------------------------------------------
// Query / result
// ---------------------------------------------------------------------------

/// The fingerprint of a replay-time call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockQuery {
    /// Trace the call executes under.
    pub trace_id: TraceId,
    /// Id of the span opened for the call (the caller position).
    pub span_id: SpanId,
    /// Logical operation name.
    pub name: String,
    /// Command or method within the package.
    pub submodule_name: String,
    /// Package the adapter instruments.
    pub package_name: String,
    /// Instrumentation identity.
    pub instrumentation_name: String,
    /// Adapter-shaped input, encoded for storage.
    pub input_value: serde_json::Value,
    /// Server / client / internal.
    pub kind: SpanKind,
    /// Call-site stack trace, when captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// A resolved recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockResult {
    /// The recorded output value, in the adapter's output shape.
    pub result: serde_json::Value,
}

// ---------------------------------------------------------------------------
// MockOracle
// ---------------------------------------------------------------------------

/// Resolves recorded responses for replay-time calls.
///
/// Implementations must be consulted before any synthesized response is
/// returned to the host; an oracle never guesses. `None` means no candidate
/// exists, and the caller decides whether that is fatal (most adapters) or
/// recoverable (background HTTP).
#[async_trait]
pub trait MockOracle: Send + Sync {
    /// Find the best recorded response for `query`, honoring the
    /// annotation side channel in `merges`.
    ///
    /// A returned span is marked consumed for the query's trace and will
    /// not be returned again.
    async fn find_mock_response(
        &self,
        query: &MockQuery,
        merges: Option<&drift_schema::SchemaMerges>,
    ) -> Option<MockResult>;
}
