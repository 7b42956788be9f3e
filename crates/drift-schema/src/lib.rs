// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-schema
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// How much a field counts during replay matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchImportance {
    /// The field participates in matching (the default).
    #[default]
    Required,
    /// The oracle must ignore this field when searching.
    Ignored,
}

impl MatchImportance {
    /// Numeric form used on the wire (`1` required, `0` ignored).
    #[must_use]
    pub fn as_level(&self) -> u8 {
        match self {
            Self::Required => 1,
            Self::Ignored => 0,
        }
    }

    /// Parse from the wire form. Any non-zero level is `Required`.
    #[must_use]
    pub fn from_level(level: u8) -> Self {
        if level == 0 { Self::Ignored } else { Self::Required }
    }
}

/// Declared byte encoding of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEncoding {
    /// Plain UTF-8 text (the default).
    #[default]
    Utf8,
    /// Base64 of a binary payload; see [`FieldAnnotation::decoded_type`].
    Base64,
}

/// Annotation attached to a single field of an input value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldAnnotation {
    /// Whether the oracle compares this field at all.
    #[serde(default)]
    pub match_importance: MatchImportance,
    /// Byte encoding of the stored value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<FieldEncoding>,
    /// Content type of the decoded payload (e.g. `"application/json"`).
    /// Only meaningful together with [`FieldEncoding::Base64`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_type: Option<String>,
}

impl FieldAnnotation {
    /// Annotation excluding the field from matching.
    #[must_use]
    pub fn ignored() -> Self {
        Self {
            match_importance: MatchImportance::Ignored,
            ..Self::default()
        }
    }

    /// Annotation declaring a base64 body of the given decoded type.
    #[must_use]
    pub fn base64(decoded_type: impl Into<String>) -> Self {
        Self {
            match_importance: MatchImportance::Required,
            encoding: Some(FieldEncoding::Base64),
            decoded_type: Some(decoded_type.into()),
        }
    }

    /// Whether the stored value is base64 of a binary payload.
    #[must_use]
    pub fn is_base64(&self) -> bool {
        self.encoding == Some(FieldEncoding::Base64)
    }

    /// Whether the decoded payload should be compared as JSON.
    #[must_use]
    pub fn decodes_to_json(&self) -> bool {
        self.decoded_type
            .as_deref()
            .is_some_and(|t| t.starts_with("application/json") || t.ends_with("+json"))
    }
}

// ---------------------------------------------------------------------------
// SchemaMerges
// ---------------------------------------------------------------------------

/// The side channel of per-field overrides sent along with an oracle query.
///
/// Keys are dotted paths into the input value (`"headers.x-request-id"`,
/// `"body"`). Later merges win on key collision, mirroring how adapters
/// layer method-level annotations over package-level defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaMerges {
    annotations: BTreeMap<String, FieldAnnotation>,
}

impl SchemaMerges {
    /// An empty merge set (all fields compared with default rules).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotate the field at `path`, replacing any existing annotation.
    #[must_use]
    pub fn with(mut self, path: impl Into<String>, annotation: FieldAnnotation) -> Self {
        self.annotations.insert(path.into(), annotation);
        self
    }

    /// Look up the annotation for a dotted field path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FieldAnnotation> {
        self.annotations.get(path)
    }

    /// Whether the field at `path` is excluded from matching.
    #[must_use]
    pub fn is_ignored(&self, path: &str) -> bool {
        self.get(path)
            .is_some_and(|a| a.match_importance == MatchImportance::Ignored)
    }

    /// Overlay `other` on top of `self`; `other` wins on collisions.
    #[must_use]
    pub fn merged_with(mut self, other: Self) -> Self {
        self.annotations.extend(other.annotations);
        self
    }

    /// Iterate annotations in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldAnnotation)> {
        self.annotations.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether no annotations are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
