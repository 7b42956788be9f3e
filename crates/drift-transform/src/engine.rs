// SPDX-License-Identifier: MIT OR Apache-2.0
//! The transform engine.
//!
//! Applies a compiled rule set to ended spans. Rules run in declaration
//! order; each applied action is appended to the span's transform metadata
//! as `{action, field, reason}`. A span no rule touches is returned
//! byte-identical, with no metadata added.

use crate::paths::{
    extract_host, parse_json_path, resolve_path_mut, rewrite_query_param, split_url,
};
use crate::rules::{
    CompileError, CompiledRule, Direction, FieldTarget, TransformAction, TransformRule,
    compile_rules,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use drift_core::{SpanKind, SpanProcessor, SpanRecord, TransformActionRecord};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A rule set compiled and validated at load time.
pub struct CompiledRuleSet {
    rules: Vec<CompiledRule>,
}

impl CompiledRuleSet {
    /// Compile `rules`, validating every regex. Fatal on the first invalid
    /// pattern: bad rules must fail deployment, not requests.
    pub fn compile(rules: Vec<TransformRule>) -> Result<Self, CompileError> {
        Ok(Self {
            rules: compile_rules(rules)?,
        })
    }

    /// An empty (pass-through) rule set.
    #[must_use]
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Number of compiled rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every matching rule to `span`, in declaration order.
    #[must_use]
    pub fn apply(&self, mut span: SpanRecord) -> SpanRecord {
        for rule in &self.rules {
            if !rule_matches_span(rule, &span) {
                continue;
            }
            if let Some(applied) = apply_rule(rule, &mut span) {
                span.transform_actions
                    .get_or_insert_with(Vec::new)
                    .push(applied);
            }
        }
        span
    }

    /// Whether a drop rule matches an inbound request before any span is
    /// created, letting the caller skip recording entirely.
    #[must_use]
    pub fn should_drop_inbound_request(
        &self,
        method: &str,
        path: &str,
        host: Option<&str>,
    ) -> bool {
        self.rules.iter().any(|rule| {
            matches!(rule.action, TransformAction::Drop)
                && !matches!(rule.direction, Some(Direction::Outbound))
                && method_matches(rule, Some(method))
                && path_matches(rule, Some(path))
                && host_matches_value(rule, host)
        })
    }
}

impl SpanProcessor for CompiledRuleSet {
    fn name(&self) -> &str {
        "transform-engine"
    }

    fn process(&self, span: SpanRecord) -> SpanRecord {
        self.apply(span)
    }
}

// ---------------------------------------------------------------------------
// Span matching
// ---------------------------------------------------------------------------

fn rule_matches_span(rule: &CompiledRule, span: &SpanRecord) -> bool {
    match rule.direction {
        Some(Direction::Inbound) if span.kind != SpanKind::Server => return false,
        Some(Direction::Outbound) if span.kind != SpanKind::Client => return false,
        _ => {}
    }
    method_matches(rule, input_str(span, "method").as_deref())
        && path_matches(rule, span_path(span).as_deref())
        && host_matches_span(rule, span)
}

fn method_matches(rule: &CompiledRule, method: Option<&str>) -> bool {
    if rule.methods.is_empty() {
        return true;
    }
    method.is_some_and(|m| rule.methods.iter().any(|want| want == &m.to_ascii_uppercase()))
}

fn path_matches(rule: &CompiledRule, path: Option<&str>) -> bool {
    match &rule.path_regex {
        None => true,
        Some(regex) => path.is_some_and(|p| regex.is_match(p)),
    }
}

fn host_matches_span(rule: &CompiledRule, span: &SpanRecord) -> bool {
    if rule.host_regex.is_none() {
        return true;
    }
    let host = match span.kind {
        // Inbound spans carry a full URL; malformed URLs silently fail
        // the match.
        SpanKind::Server => input_str(span, "url").as_deref().and_then(extract_host),
        _ => input_str(span, "hostname"),
    };
    host_matches_value(rule, host.as_deref())
}

fn host_matches_value(rule: &CompiledRule, host: Option<&str>) -> bool {
    match &rule.host_regex {
        None => true,
        Some(regex) => host.is_some_and(|h| regex.is_match(h)),
    }
}

fn input_str(span: &SpanRecord, key: &str) -> Option<String> {
    span.input_value.get(key)?.as_str().map(str::to_string)
}

/// The path portion of the span's URL-ish field, query stripped.
fn span_path(span: &SpanRecord) -> Option<String> {
    let raw = input_str(span, "path")
        .or_else(|| input_str(span, "target"))
        .or_else(|| input_str(span, "url"))?;
    split_url(&raw).map(|(_, path, _)| path)
}

// ---------------------------------------------------------------------------
// Action application
// ---------------------------------------------------------------------------

fn apply_rule(rule: &CompiledRule, span: &mut SpanRecord) -> Option<TransformActionRecord> {
    if matches!(rule.action, TransformAction::Drop) {
        span.input_value = Value::Object(serde_json::Map::new());
        span.output_value = Some(Value::Object(serde_json::Map::new()));
        return Some(TransformActionRecord {
            action: "drop".into(),
            field: "span".into(),
            reason: rule.reason.clone(),
        });
    }

    let target = rule.target.as_ref()?;
    let mut touched = false;
    match target {
        FieldTarget::Header { name } => {
            touched |= edit_headers(&mut span.input_value, name, &rule.action);
            if let Some(output) = span.output_value.as_mut() {
                touched |= edit_headers(output, name, &rule.action);
            }
        }
        FieldTarget::JsonPath { path } => {
            let segments = parse_json_path(path);
            touched |= edit_body(&mut span.input_value, |body| {
                edit_at_path(body, &segments, &rule.action)
            });
            if let Some(output) = span.output_value.as_mut() {
                touched |= edit_body(output, |body| edit_at_path(body, &segments, &rule.action));
            }
        }
        FieldTarget::QueryParam { name } => {
            touched |= edit_url_field(&mut span.input_value, |url| {
                rewrite_query_param(url, name, |value| transformed_string(&rule.action, value))
            });
        }
        FieldTarget::UrlPath => {
            touched |= edit_url_field(&mut span.input_value, |url| {
                let (prefix, path, query) = split_url(url)?;
                let new_path = transformed_string(&rule.action, &path);
                Some(match query {
                    Some(q) => format!("{prefix}{new_path}?{q}"),
                    None => format!("{prefix}{new_path}"),
                })
            });
        }
        FieldTarget::FullBody => {
            touched |= edit_whole_body(&mut span.input_value, &rule.action);
            if let Some(output) = span.output_value.as_mut() {
                touched |= edit_whole_body(output, &rule.action);
            }
        }
    }

    touched.then(|| TransformActionRecord {
        action: rule.action.label().into(),
        field: target.label(),
        reason: rule.reason.clone(),
    })
}

/// The replacement string an action produces for `raw`.
fn transformed_string(action: &TransformAction, raw: &str) -> String {
    match action {
        TransformAction::Redact { prefix } => {
            let digest = Sha256::digest(raw.as_bytes());
            let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
            format!("{prefix}{}...", &hex[..12])
        }
        TransformAction::Mask { mask_char } => mask_char.to_string().repeat(raw.chars().count()),
        TransformAction::Replace { value } => value.clone(),
        TransformAction::Drop => String::new(),
    }
}

/// Apply an action to a JSON value in place, stringifying non-strings
/// first. Transformation never changes field presence, only values.
fn transform_value(action: &TransformAction, value: &mut Value) {
    let raw = match value {
        Value::String(s) => s.clone(),
        ref other => other.to_string(),
    };
    *value = Value::String(transformed_string(action, &raw));
}

fn edit_at_path(body: &mut Value, segments: &[String], action: &TransformAction) -> bool {
    match resolve_path_mut(body, segments) {
        Some(slot) => {
            transform_value(action, slot);
            true
        }
        None => false,
    }
}

/// Run `f` against the span's body field, transparently decoding and
/// re-encoding a base64 JSON body so the edit is bit-safe.
fn edit_body(container: &mut Value, f: impl Fn(&mut Value) -> bool) -> bool {
    let Some(body) = container.get_mut("body") else {
        return false;
    };
    if let Value::String(encoded) = body {
        if let Ok(bytes) = BASE64.decode(encoded.as_bytes()) {
            if let Ok(mut json) = serde_json::from_slice::<Value>(&bytes) {
                let touched = f(&mut json);
                if touched {
                    let serialized = serde_json::to_vec(&json).unwrap_or_default();
                    *body = Value::String(BASE64.encode(serialized));
                }
                return touched;
            }
        }
        return false;
    }
    f(body)
}

fn edit_whole_body(container: &mut Value, action: &TransformAction) -> bool {
    let Some(body) = container.get_mut("body") else {
        return false;
    };
    if let Value::String(encoded) = body {
        if let Ok(bytes) = BASE64.decode(encoded.as_bytes()) {
            let raw = String::from_utf8_lossy(&bytes);
            let replaced = transformed_string(action, &raw);
            *body = Value::String(BASE64.encode(replaced.as_bytes()));
            return true;
        }
    }
    transform_value(action, body);
    true
}

fn edit_headers(container: &mut Value, name: &str, action: &TransformAction) -> bool {
    let Some(Value::Object(headers)) = container.get_mut("headers") else {
        return false;
    };
    let mut touched = false;
    for (key, value) in headers.iter_mut() {
        if key.eq_ignore_ascii_case(name) {
            match value {
                // Multi-valued headers: every value is rewritten.
                Value::Array(values) => {
                    for v in values {
                        transform_value(action, v);
                    }
                }
                _ => transform_value(action, value),
            }
            touched = true;
        }
    }
    touched
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
