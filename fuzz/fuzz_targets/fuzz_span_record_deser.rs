// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fuzz span-record deserialization from arbitrary JSON text.
//!
//! Verifies that parsing never panics and that every successfully parsed
//! record re-serializes and re-parses to the same value.
#![no_main]
use drift_core::SpanRecord;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(record) = serde_json::from_str::<SpanRecord>(data) {
        let text = serde_json::to_string(&record).expect("serializing a parsed record");
        let back: SpanRecord = serde_json::from_str(&text).expect("reparsing a serialized record");
        assert_eq!(back, record);
    }
});
