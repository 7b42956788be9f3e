// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trace and span identifiers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier shared by every span of one inbound request.
///
/// Inbound `x-td-trace-id` header values are adopted **verbatim**, so this
/// is an opaque non-empty string rather than a UUID. Synthetic ids (for
/// requests that did not arrive with one) are freshly generated UUIDv4
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Allocate a fresh synthetic trace id.
    #[must_use]
    pub fn new_synthetic() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Adopt an inbound header value. Empty values are rejected.
    #[must_use]
    pub fn from_header(value: &str) -> Option<Self> {
        if value.is_empty() {
            None
        } else {
            Some(Self(value.to_string()))
        }
    }

    /// The raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a single span.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct SpanId(Uuid);

impl SpanId {
    /// Allocate a fresh span id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_rejects_empty_header() {
        assert!(TraceId::from_header("").is_none());
    }

    #[test]
    fn trace_id_adopts_header_verbatim() {
        let id = TraceId::from_header("trace-from-driver-42").unwrap();
        assert_eq!(id.as_str(), "trace-from-driver-42");
    }

    #[test]
    fn synthetic_trace_ids_are_unique() {
        assert_ne!(TraceId::new_synthetic(), TraceId::new_synthetic());
    }

    #[test]
    fn span_id_serializes_as_bare_uuid_string() {
        let id = SpanId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
