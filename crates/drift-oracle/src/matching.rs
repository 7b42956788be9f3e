// SPDX-License-Identifier: MIT OR Apache-2.0
//! Field-by-field input comparison.
//!
//! Two input values match when every field not excluded by an annotation
//! compares equal. Base64-annotated fields are decoded first and compared
//! as their declared content type: JSON structurally, anything else byte
//! for byte. Paths into nested values are dotted (`"headers.host"`,
//! `"args.0"`), matching the annotation key space of `drift-schema`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use drift_schema::SchemaMerges;
use serde_json::Value;

/// Whether `recorded` and `query` inputs agree on every compared field.
#[must_use]
pub fn inputs_match(recorded: &Value, query: &Value, merges: Option<&SchemaMerges>) -> bool {
    values_match("", recorded, query, merges)
}

fn values_match(path: &str, recorded: &Value, query: &Value, merges: Option<&SchemaMerges>) -> bool {
    if let Some(merges) = merges {
        if !path.is_empty() && merges.is_ignored(path) {
            return true;
        }
        if let Some(annotation) = merges.get(path) {
            if annotation.is_base64() {
                if let (Value::String(a), Value::String(b)) = (recorded, query) {
                    return base64_payloads_match(a, b, annotation.decodes_to_json());
                }
            }
        }
    }

    match (recorded, query) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: std::collections::BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            keys.iter().all(|key| {
                let child_path = join(path, key);
                match (a.get(*key), b.get(*key)) {
                    (Some(ra), Some(qa)) => values_match(&child_path, ra, qa, merges),
                    // A field present on one side only still matches when
                    // annotations exclude it.
                    _ => merges.is_some_and(|m| m.is_ignored(&child_path)),
                }
            })
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len()
                && a.iter().zip(b.iter()).enumerate().all(|(i, (ra, qa))| {
                    values_match(&join(path, &i.to_string()), ra, qa, merges)
                })
        }
        _ => recorded == query,
    }
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn base64_payloads_match(recorded: &str, query: &str, as_json: bool) -> bool {
    let (Ok(a), Ok(b)) = (BASE64.decode(recorded), BASE64.decode(query)) else {
        // Undecodable payloads fall back to literal comparison.
        return recorded == query;
    };
    if as_json {
        match (
            serde_json::from_slice::<Value>(&a),
            serde_json::from_slice::<Value>(&b),
        ) {
            (Ok(ja), Ok(jb)) => ja == jb,
            _ => a == b,
        }
    } else {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use drift_schema::{FieldAnnotation, SchemaMerges};
    use serde_json::json;

    #[test]
    fn identical_inputs_match() {
        let v = json!({"method": "POST", "path": "/api/login"});
        assert!(inputs_match(&v, &v, None));
    }

    #[test]
    fn differing_field_fails() {
        let a = json!({"method": "POST", "path": "/api/login"});
        let b = json!({"method": "POST", "path": "/api/logout"});
        assert!(!inputs_match(&a, &b, None));
    }

    #[test]
    fn ignored_fields_are_skipped() {
        let merges = SchemaMerges::new().with("timestamp", FieldAnnotation::ignored());
        let a = json!({"sql": "SELECT 1", "timestamp": 111});
        let b = json!({"sql": "SELECT 1", "timestamp": 999});
        assert!(inputs_match(&a, &b, Some(&merges)));
    }

    #[test]
    fn ignored_nested_header_is_skipped() {
        let merges = SchemaMerges::new().with("headers.x-request-id", FieldAnnotation::ignored());
        let a = json!({"headers": {"host": "api", "x-request-id": "1"}});
        let b = json!({"headers": {"host": "api", "x-request-id": "2"}});
        assert!(inputs_match(&a, &b, Some(&merges)));
    }

    #[test]
    fn field_missing_on_one_side_fails_unless_ignored() {
        let a = json!({"sql": "SELECT 1", "trace": "x"});
        let b = json!({"sql": "SELECT 1"});
        assert!(!inputs_match(&a, &b, None));

        let merges = SchemaMerges::new().with("trace", FieldAnnotation::ignored());
        assert!(inputs_match(&a, &b, Some(&merges)));
    }

    #[test]
    fn base64_json_bodies_compare_structurally() {
        // Same JSON, different key order and whitespace.
        let a = BASE64.encode(br#"{"email":"u@e.com","password":"p"}"#);
        let b = BASE64.encode(br#"{ "password": "p", "email": "u@e.com" }"#);
        let merges = SchemaMerges::new().with("body", FieldAnnotation::base64("application/json"));
        assert!(inputs_match(
            &json!({"body": a}),
            &json!({"body": b}),
            Some(&merges)
        ));
    }

    #[test]
    fn base64_text_bodies_compare_by_bytes() {
        let a = BASE64.encode(b"hello");
        let b = BASE64.encode(b"hello ");
        let merges = SchemaMerges::new().with("body", FieldAnnotation::base64("text/plain"));
        assert!(!inputs_match(
            &json!({"body": a}),
            &json!({"body": b}),
            Some(&merges)
        ));
    }

    #[test]
    fn array_length_mismatch_fails() {
        let a = json!({"args": ["user:1"]});
        let b = json!({"args": ["user:1", "extra"]});
        assert!(!inputs_match(&a, &b, None));
    }

    #[test]
    fn array_elements_compare_by_index_path() {
        let merges = SchemaMerges::new().with("args.1", FieldAnnotation::ignored());
        let a = json!({"args": ["user:1", "nonce-a"]});
        let b = json!({"args": ["user:1", "nonce-b"]});
        assert!(inputs_match(&a, &b, Some(&merges)));
    }
}
