// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rule model and compilation.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which side of the host a span observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Server spans (requests into the host).
    Inbound,
    /// Client spans (calls out of the host).
    Outbound,
}

/// The field a rule edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldTarget {
    /// Every header with this name, case-insensitively, on input and
    /// output.
    Header {
        /// Header name.
        name: String,
    },
    /// A path into the JSON body (e.g. `"$.user.password"`).
    JsonPath {
        /// The path expression.
        path: String,
    },
    /// A single query parameter; all others are preserved.
    QueryParam {
        /// Parameter name.
        name: String,
    },
    /// The path portion of the URL, query preserved.
    UrlPath,
    /// The entire body.
    FullBody,
}

impl FieldTarget {
    /// The label recorded in transform metadata for this target.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Header { name } => format!("header:{name}"),
            Self::JsonPath { path } => format!("jsonPath:{path}"),
            Self::QueryParam { name } => format!("queryParam:{name}"),
            Self::UrlPath => "urlPath".to_string(),
            Self::FullBody => "body".to_string(),
        }
    }
}

/// Predicates selecting which spans (and which field) a rule applies to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMatcher {
    /// Restrict to inbound or outbound spans; `None` matches both.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// HTTP methods (upper-cased); empty matches any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Regex over the span's URL path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    /// Regex over the span's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_pattern: Option<String>,
    /// The field the action edits. Required for every action except
    /// [`TransformAction::Drop`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<FieldTarget>,
}

/// What to do with the matched field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformAction {
    /// Replace with `<prefix><12 hex chars of sha-256>...`; deterministic
    /// across runs.
    Redact {
        /// Prefix prepended to the digest (e.g. `"PWD_"`).
        prefix: String,
    },
    /// Replace every character with the mask character.
    Mask {
        /// Mask character; `*` when omitted.
        #[serde(default = "default_mask_char")]
        mask_char: char,
    },
    /// Replace with a literal value.
    Replace {
        /// The substitute.
        value: String,
    },
    /// Blank the entire span: input and output become empty objects.
    Drop,
}

fn default_mask_char() -> char {
    '*'
}

impl TransformAction {
    /// The label recorded in transform metadata for this action.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Redact { .. } => "redact",
            Self::Mask { .. } => "mask",
            Self::Replace { .. } => "replace",
            Self::Drop => "drop",
        }
    }
}

/// One matcher/action pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRule {
    /// Span and field predicates.
    pub matcher: RuleMatcher,
    /// The edit to apply.
    pub action: TransformAction,
    /// Free-text reason recorded in transform metadata; a positional
    /// default is synthesized when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Errors raised while compiling a rule set. Fatal at load by design.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// A path or host pattern is not a valid regex.
    #[error("rule #{index}: invalid {field} pattern: {source}")]
    InvalidPattern {
        /// Position of the offending rule.
        index: usize,
        /// Which pattern field failed (`"path"` or `"host"`).
        field: &'static str,
        /// The regex error.
        #[source]
        source: regex::Error,
    },
    /// A non-drop action has no field target.
    #[error("rule #{index}: action '{action}' requires a field target")]
    MissingTarget {
        /// Position of the offending rule.
        index: usize,
        /// The action label.
        action: &'static str,
    },
}

pub(crate) struct CompiledRule {
    pub direction: Option<Direction>,
    pub methods: Vec<String>,
    pub path_regex: Option<Regex>,
    pub host_regex: Option<Regex>,
    pub target: Option<FieldTarget>,
    pub action: TransformAction,
    pub reason: String,
}

pub(crate) fn compile_rules(rules: Vec<TransformRule>) -> Result<Vec<CompiledRule>, CompileError> {
    rules
        .into_iter()
        .enumerate()
        .map(|(index, rule)| {
            let path_regex = rule
                .matcher
                .path_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| CompileError::InvalidPattern {
                    index,
                    field: "path",
                    source,
                })?;
            let host_regex = rule
                .matcher
                .host_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| CompileError::InvalidPattern {
                    index,
                    field: "host",
                    source,
                })?;
            if rule.matcher.target.is_none() && !matches!(rule.action, TransformAction::Drop) {
                return Err(CompileError::MissingTarget {
                    index,
                    action: rule.action.label(),
                });
            }
            Ok(CompiledRule {
                direction: rule.matcher.direction,
                methods: rule
                    .matcher
                    .methods
                    .iter()
                    .map(|m| m.to_ascii_uppercase())
                    .collect(),
                path_regex,
                host_regex,
                target: rule.matcher.target,
                action: rule.action,
                reason: rule.reason.unwrap_or_else(|| format!("rule#{index}")),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_regex_is_fatal_at_compile() {
        let rule = TransformRule {
            matcher: RuleMatcher {
                path_pattern: Some("([unclosed".into()),
                target: Some(FieldTarget::FullBody),
                ..RuleMatcher::default()
            },
            action: TransformAction::Mask { mask_char: '*' },
            reason: None,
        };
        let err = compile_rules(vec![rule]).unwrap_err();
        assert!(matches!(
            err,
            CompileError::InvalidPattern { index: 0, field: "path", .. }
        ));
    }

    #[test]
    fn non_drop_action_requires_target() {
        let rule = TransformRule {
            matcher: RuleMatcher::default(),
            action: TransformAction::Replace { value: "x".into() },
            reason: None,
        };
        assert!(matches!(
            compile_rules(vec![rule]).unwrap_err(),
            CompileError::MissingTarget { .. }
        ));
    }

    #[test]
    fn drop_needs_no_target() {
        let rule = TransformRule {
            matcher: RuleMatcher::default(),
            action: TransformAction::Drop,
            reason: None,
        };
        assert!(compile_rules(vec![rule]).is_ok());
    }

    #[test]
    fn mask_char_defaults_to_star() {
        let json = r#"{"matcher": {"target": {"type": "full_body"}}, "action": {"type": "mask"}}"#;
        let rule: TransformRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.action, TransformAction::Mask { mask_char: '*' });
    }

    #[test]
    fn field_labels() {
        assert_eq!(
            FieldTarget::JsonPath { path: "$.password".into() }.label(),
            "jsonPath:$.password"
        );
        assert_eq!(FieldTarget::UrlPath.label(), "urlPath");
        assert_eq!(
            FieldTarget::Header { name: "Authorization".into() }.label(),
            "header:Authorization"
        );
    }
}
