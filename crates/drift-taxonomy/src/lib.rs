// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-taxonomy
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// The five classes of failure the SDK distinguishes.
///
/// Each kind implies a propagation policy:
///
/// - **OracleMiss** — replay only; surfaces to the caller as a
///   library-native failure.
/// - **OriginalFailure** — record path; recorded, then re-raised unchanged.
/// - **Reified** — replay reconstructs an error the real dependency would
///   have raised.
/// - **Instrumentation** — a bug in a patch; logged and swallowed, never
///   shown to the host.
/// - **VersionUnsupported** — telemetry only; original behavior preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No recorded span matched a replay-time call.
    OracleMiss,
    /// The real dependency failed while recording.
    OriginalFailure,
    /// A recorded error reconstructed during replay.
    Reified,
    /// The instrumentation itself misbehaved.
    Instrumentation,
    /// The loaded package version is outside every supported range.
    VersionUnsupported,
}

impl FailureKind {
    /// Machine-readable code string (e.g. `"DRIFT-O001"`).
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OracleMiss => "DRIFT-O001",
            Self::OriginalFailure => "DRIFT-R001",
            Self::Reified => "DRIFT-R002",
            Self::Instrumentation => "DRIFT-I001",
            Self::VersionUnsupported => "DRIFT-M001",
        }
    }

    /// Human-readable category label.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::OracleMiss => "oracle",
            Self::OriginalFailure | Self::Reified => "replay",
            Self::Instrumentation => "instrumentation",
            Self::VersionUnsupported => "module",
        }
    }

    /// Whether failures of this kind may ever reach host code.
    ///
    /// Instrumentation failures and version mismatches are internal by
    /// policy; everything else surfaces in a library-native shape.
    #[must_use]
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, Self::Instrumentation | Self::VersionUnsupported)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// ReifiedError
// ---------------------------------------------------------------------------

/// A serializable capture of an error raised by a real dependency.
///
/// Recorded on the span's output value when the record path observes a
/// failure, and rebuilt into an equivalent typed error during replay. The
/// `class_tag` preserves variant identity for libraries that distinguish
/// error classes (see the per-adapter error enums), so replay can
/// pattern-match back into the same variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReifiedError {
    /// Error class name as the library exposed it (e.g. `"ReplyError"`).
    pub name: String,
    /// Original error message.
    pub message: String,
    /// Stack trace at capture time, when one was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Adapter-specific variant tag used to restore class identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_tag: Option<String>,
    /// Library-specific fields (error codes, SQL states, gRPC status...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl ReifiedError {
    /// Capture a live error value.
    #[must_use]
    pub fn capture(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            class_tag: None,
            fields: BTreeMap::new(),
        }
    }

    /// Attach a stack trace.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Attach the adapter-specific class tag.
    #[must_use]
    pub fn with_class_tag(mut self, tag: impl Into<String>) -> Self {
        self.class_tag = Some(tag.into());
        self
    }

    /// Attach a library-specific field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Encode as the error half of a span output value.
    #[must_use]
    pub fn to_output_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode from a span output value. Returns `None` when the value does
    /// not carry a reified error (i.e. the recorded outcome was a success).
    #[must_use]
    pub fn from_output_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl fmt::Display for ReifiedError {
    /// Renders like the library's own error string, so hosts that log the
    /// message cannot tell a replayed failure from a live one.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ReifiedError {}

// ---------------------------------------------------------------------------
// DriftFailure
// ---------------------------------------------------------------------------

/// Typed failure raised inside the SDK, carrying its classification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DriftFailure {
    /// No recorded response matched the replay-time fingerprint.
    #[error("[{code}] no recorded response for {name} ({submodule})", code = FailureKind::OracleMiss)]
    OracleMiss {
        /// Logical span name of the unmatched call.
        name: String,
        /// Submodule of the unmatched call.
        submodule: String,
    },

    /// The real dependency failed during recording.
    #[error("[{code}] dependency failed while recording: {reified}", code = FailureKind::OriginalFailure)]
    OriginalFailure {
        /// Captured form of the original error.
        reified: ReifiedError,
    },

    /// A recorded error replayed back to the host.
    #[error("[{code}] {reified}", code = FailureKind::Reified)]
    Reified {
        /// The reconstructed error.
        reified: ReifiedError,
    },

    /// The patch itself misbehaved. Never shown to the host.
    #[error("[{code}] instrumentation failure in {site}: {detail}", code = FailureKind::Instrumentation)]
    Instrumentation {
        /// Interception site that failed (e.g. `"http.request"`).
        site: String,
        /// Human-readable description.
        detail: String,
    },

    /// The loaded package version has no covering patch.
    #[error("[{code}] {package}@{version} is outside every supported range", code = FailureKind::VersionUnsupported)]
    VersionUnsupported {
        /// Package name.
        package: String,
        /// Detected version, or `"unknown"`.
        version: String,
    },
}

impl DriftFailure {
    /// Classification of this failure.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::OracleMiss { .. } => FailureKind::OracleMiss,
            Self::OriginalFailure { .. } => FailureKind::OriginalFailure,
            Self::Reified { .. } => FailureKind::Reified,
            Self::Instrumentation { .. } => FailureKind::Instrumentation,
            Self::VersionUnsupported { .. } => FailureKind::VersionUnsupported,
        }
    }

    /// Stable code string of this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Build an instrumentation failure from any error-like source.
    #[must_use]
    pub fn instrumentation(site: impl Into<String>, detail: impl fmt::Display) -> Self {
        Self::Instrumentation {
            site: site.into(),
            detail: detail.to_string(),
        }
    }
}

/// Convenience result alias for fallible SDK-internal operations.
pub type DriftResult<T> = Result<T, DriftFailure>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
