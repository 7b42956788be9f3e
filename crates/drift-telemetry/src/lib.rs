// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-telemetry
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Environment variable that suppresses telemetry collection.
pub const ANALYTICS_DISABLED_ENV: &str = "TUSK_ANALYTICS_DISABLED";

// ---------------------------------------------------------------------------
// TelemetryEvent
// ---------------------------------------------------------------------------

/// A self-diagnostic event emitted by the SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// A loaded package version is outside every supported range.
    VersionMismatch {
        /// The package that was loaded.
        package: String,
        /// The detected version string.
        version: String,
    },
    /// A package was loaded whose version could not be determined.
    VersionUnknown {
        /// The package that was loaded.
        package: String,
    },
    /// The SDK was initialized.
    SdkInitialized {
        /// Operating mode at initialization.
        mode: String,
    },
}

impl TelemetryEvent {
    /// Deduplication key: one-shot events with the same key are emitted
    /// only once per process.
    #[must_use]
    fn dedup_key(&self) -> Option<String> {
        match self {
            Self::VersionMismatch { package, .. } => Some(format!("version_mismatch:{package}")),
            Self::VersionUnknown { package } => Some(format!("version_unknown:{package}")),
            Self::SdkInitialized { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// TelemetryClient
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ClientShared {
    seen: Mutex<BTreeSet<String>>,
    events: Mutex<Vec<TelemetryEvent>>,
}

/// Buffering telemetry client.
///
/// Events are mirrored to `tracing` at info level and kept in an in-memory
/// buffer for export or inspection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TelemetryClient {
    enabled: bool,
    shared: Arc<ClientShared>,
}

impl TelemetryClient {
    /// A client with collection explicitly on or off.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            shared: Arc::new(ClientShared::default()),
        }
    }

    /// A client honoring [`ANALYTICS_DISABLED_ENV`]: any non-empty value
    /// other than `"0"` or `"false"` disables collection.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ANALYTICS_DISABLED_ENV)
            .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        Self::new(!disabled)
    }

    /// Whether collection is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record an event. One-shot events already seen this process are
    /// silently dropped; with collection disabled everything is dropped.
    pub fn emit(&self, event: TelemetryEvent) {
        if !self.enabled {
            return;
        }
        if let Some(key) = event.dedup_key() {
            let mut seen = self.shared.seen.lock().expect("telemetry lock");
            if !seen.insert(key) {
                return;
            }
        }
        info!(event = ?event, "drift_telemetry");
        self.shared
            .events
            .lock()
            .expect("telemetry lock")
            .push(event);
    }

    /// Shorthand for the one-shot version-mismatch event.
    pub fn version_mismatch(&self, package: impl Into<String>, version: impl Into<String>) {
        self.emit(TelemetryEvent::VersionMismatch {
            package: package.into(),
            version: version.into(),
        });
    }

    /// Shorthand for the one-shot version-unknown event.
    pub fn version_unknown(&self, package: impl Into<String>) {
        self.emit(TelemetryEvent::VersionUnknown {
            package: package.into(),
        });
    }

    /// Snapshot of every buffered event, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.shared.events.lock().expect("telemetry lock").clone()
    }
}

impl Default for TelemetryClient {
    fn default() -> Self {
        Self::new(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn version_mismatch_is_one_shot_per_package() {
        let client = TelemetryClient::new(true);
        client.version_mismatch("ioredis", "9.0.0");
        client.version_mismatch("ioredis", "9.0.1");
        client.version_mismatch("mysql2", "4.0.0");
        let events = client.events();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            TelemetryEvent::VersionMismatch {
                package: "ioredis".into(),
                version: "9.0.0".into()
            }
        );
    }

    #[test]
    fn disabled_client_buffers_nothing() {
        let client = TelemetryClient::new(false);
        client.version_mismatch("ioredis", "9.0.0");
        client.emit(TelemetryEvent::SdkInitialized {
            mode: "RECORD".into(),
        });
        assert!(client.events().is_empty());
    }

    #[test]
    fn non_dedup_events_repeat() {
        let client = TelemetryClient::new(true);
        client.emit(TelemetryEvent::SdkInitialized {
            mode: "RECORD".into(),
        });
        client.emit(TelemetryEvent::SdkInitialized {
            mode: "REPLAY".into(),
        });
        assert_eq!(client.events().len(), 2);
    }

    #[test]
    fn clones_share_dedup_state() {
        let client = TelemetryClient::new(true);
        let clone = client.clone();
        client.version_unknown("pg");
        clone.version_unknown("pg");
        assert_eq!(client.events().len(), 1);
    }
}
