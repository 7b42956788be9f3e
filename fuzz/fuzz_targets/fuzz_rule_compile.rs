// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fuzz transform-rule deserialization and compilation.
//!
//! Rule sets come from host configuration, so arbitrary JSON must either
//! fail to parse, fail to compile, or produce a set that applies cleanly
//! to a minimal span without panicking.
#![no_main]
use drift_core::{
    PackageType, SpanId, SpanKind, SpanStatus, SpanTiming, TraceId,
};
use drift_transform::{CompiledRuleSet, TransformRule};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    let Ok(rules) = serde_json::from_str::<Vec<TransformRule>>(data) else {
        return;
    };
    let Ok(compiled) = CompiledRuleSet::compile(rules) else {
        return;
    };
    let span = drift_core::SpanRecord {
        span_id: SpanId::new(),
        trace_id: TraceId::new_synthetic(),
        parent_span_id: None,
        kind: SpanKind::Server,
        package_type: PackageType::Http,
        package_name: "http".into(),
        instrumentation_name: "HttpInstrumentation".into(),
        submodule_name: "GET".into(),
        name: "/fuzz".into(),
        input_value: serde_json::json!({
            "method": "GET",
            "url": "/fuzz?q=1",
            "headers": {"host": "fuzz.internal"},
            "body": {"field": "value"},
        }),
        output_value: Some(serde_json::json!({"statusCode": 200})),
        status: SpanStatus::ok(),
        timing: SpanTiming::started_now(),
        is_pre_app_start: false,
        stop_recording_child_spans: false,
        stack_trace: None,
        transform_actions: None,
    };
    let out = compiled.apply(span);
    // Identity fields survive every action, including drop.
    assert_eq!(out.name, "/fuzz");
    let _ = compiled.should_drop_inbound_request("GET", "/fuzz", Some("fuzz.internal"));
});
