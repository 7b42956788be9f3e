// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fuzz URL splitting, host extraction, and query-parameter rewriting.
//!
//! Verifies:
//! 1. No panics on arbitrary URL-ish strings.
//! 2. `split_url` reassembles to the original when a path was found.
//! 3. Rewriting a query parameter preserves every other parameter.
#![no_main]
use drift_transform::paths::{extract_host, rewrite_query_param, split_url};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: (&str, &str)| {
    let (url, param) = data;

    if let Some((prefix, path, query)) = split_url(url) {
        let reassembled = match &query {
            Some(q) => format!("{prefix}{path}?{q}"),
            None => format!("{prefix}{path}"),
        };
        assert_eq!(reassembled, url);
    }

    let _ = extract_host(url);

    if !param.is_empty() && !param.contains(['&', '=']) {
        if let Some(rewritten) = rewrite_query_param(url, param, |_| "X".into()) {
            let originals: Vec<&str> = url.split_once('?').map(|(_, q)| q).unwrap_or_default()
                .split('&')
                .filter(|pair| pair.split_once('=').is_none_or(|(k, _)| k != param))
                .collect();
            for pair in originals {
                assert!(rewritten.contains(pair));
            }
        }
    }
});
