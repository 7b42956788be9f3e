// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fuzz best-effort version resolution.
//!
//! Host-reported version strings are untrusted; resolution must never
//! panic and must be stable (resolving the rendered version again yields
//! the same version).
#![no_main]
use drift_patch::registry::resolve_version;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|raw: &str| {
    if let Some(version) = resolve_version(raw) {
        let rendered = version.to_string();
        assert_eq!(resolve_version(&rendered), Some(version));
    }
});
