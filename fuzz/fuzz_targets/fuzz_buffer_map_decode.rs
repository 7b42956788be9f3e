// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fuzz body decoding against arbitrary JSON and buffer maps.
//!
//! Verifies:
//! 1. Decoding never panics, whatever the JSON form and side map claim.
//! 2. Encoding a successfully decoded tree and decoding it again is
//!    lossless.
#![no_main]
use drift_core::{BodyValue, BufferMap};
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;

fuzz_target!(|data: (&str, Vec<(String, String)>)| {
    let (json_text, raw_map) = data;
    let Ok(json) = serde_json::from_str::<serde_json::Value>(json_text) else {
        return;
    };
    let buffers = BufferMap(raw_map.into_iter().collect::<BTreeMap<_, _>>());

    if let Ok(decoded) = BodyValue::decode_with_buffers(&json, &buffers) {
        let (reencoded, side) = decoded.encode_with_buffers();
        let again = BodyValue::decode_with_buffers(&reencoded, &side)
            .expect("re-decoding an encoded tree");
        assert_eq!(again, decoded);
    }
});
