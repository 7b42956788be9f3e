// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fuzz the JSONPath-lite parser and path resolution.
//!
//! Verifies:
//! 1. No panics on any path expression.
//! 2. Parsed segments are never empty and never retain a `[`.
//! 3. Resolving a parsed path against arbitrary JSON never panics.
#![no_main]
use drift_transform::paths::{parse_json_path, resolve_path_mut};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str)| {
    let (path, json_text) = data;
    let segments = parse_json_path(path);
    for segment in &segments {
        assert!(!segment.is_empty());
        assert!(!segment.contains('['));
    }
    if let Ok(mut value) = serde_json::from_str::<serde_json::Value>(json_text) {
        let _ = resolve_path_mut(&mut value, &segments);
    }
});
