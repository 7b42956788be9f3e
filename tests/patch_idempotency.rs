// SPDX-License-Identifier: MIT OR Apache-2.0
//! Idempotent-patching guarantees across the registry and the adapters.

use drift_core::Mode;
use drift_adapter_http::{HttpAdapter, HttpTransport, OutboundResponse};
use drift_sdk::{DriftConfig, DriftRuntime, RecordingStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn transport(counter: Arc<AtomicUsize>) -> HttpTransport {
    Arc::new(move |_request| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(OutboundResponse {
                status_code: 200,
                status_message: "OK".into(),
                headers: BTreeMap::new(),
                http_version: "1.1".into(),
                body: b"live".to_vec(),
            })
        })
    })
}

#[tokio::test]
async fn patching_twice_returns_the_same_exports() {
    let runtime = DriftRuntime::build(DriftConfig::new("k", "test"), Mode::Disabled).unwrap();
    runtime.mark_app_as_ready();
    let adapters = drift_sdk::install_adapters(&runtime, Arc::new(RecordingStore::new()));
    let _ = adapters;

    let calls = Arc::new(AtomicUsize::new(0));
    let exports: drift_patch::Exports = Arc::new(transport(Arc::clone(&calls)));

    let once = runtime
        .registry()
        .on_module_load("http", Some("1.0.0"), exports);
    assert!(runtime.registry().is_patched(&once));

    // Re-offering the patched exports must return them untouched.
    let twice = runtime
        .registry()
        .on_module_load("http", Some("1.0.0"), once.clone());
    assert!(Arc::ptr_eq(&once, &twice));
}

#[tokio::test]
async fn patched_transport_behaves_identically_when_disabled() {
    // Mode isolation: in DISABLED mode the wrapped transport must produce
    // the unwrapped transport's exact return value.
    let runtime = DriftRuntime::build(DriftConfig::new("k", "test"), Mode::Disabled).unwrap();
    runtime.mark_app_as_ready();
    let oracle = Arc::new(RecordingStore::new());
    let http = Arc::new(HttpAdapter::new(
        runtime.gate().clone(),
        runtime.kernel().clone(),
        oracle,
    ));
    runtime.registry().register(http.patched_module());

    let calls = Arc::new(AtomicUsize::new(0));
    let plain = transport(Arc::clone(&calls));
    let exports: drift_patch::Exports = Arc::new(plain.clone());
    let patched = runtime
        .registry()
        .on_module_load("http", Some("1.0.0"), exports);
    let patched_transport = patched
        .downcast_ref::<HttpTransport>()
        .expect("patched exports keep the transport type");

    let request = drift_adapter_http::OutboundRequest {
        method: "GET".into(),
        protocol: "http:".into(),
        hostname: "svc".into(),
        port: None,
        path: "/x".into(),
        headers: BTreeMap::new(),
        body: Vec::new(),
    };
    let via_patch = (patched_transport)(request.clone()).await.unwrap();
    let via_plain = (plain)(request).await.unwrap();
    assert_eq!(via_patch, via_plain);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn version_mismatch_passes_through_with_one_telemetry_event() {
    let runtime = DriftRuntime::build(DriftConfig::new("k", "test"), Mode::Record).unwrap();
    let oracle = Arc::new(RecordingStore::new());
    let redis = Arc::new(drift_adapter_redis::RedisAdapter::new(
        runtime.gate().clone(),
        runtime.kernel().clone(),
        oracle,
    ));
    runtime.registry().register(redis.patched_module());

    let baseline = runtime.telemetry().events().len();
    let exports: drift_patch::Exports = Arc::new(());
    // 9.x is outside the supported range.
    let out = runtime
        .registry()
        .on_module_load("ioredis", Some("9.0.0"), exports.clone());
    assert!(Arc::ptr_eq(&out, &exports));
    let _ = runtime
        .registry()
        .on_module_load("ioredis", Some("9.0.0"), exports);

    if runtime.telemetry().is_enabled() {
        // One-shot per package, not per load.
        assert_eq!(runtime.telemetry().events().len(), baseline + 1);
    }
}
