// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-config
#![deny(unsafe_code)]
#![warn(missing_docs)]

use drift_core::{Mode, ModeGate, SpanKernel};
use drift_patch::PatchRegistry;
use drift_telemetry::{TelemetryClient, TelemetryEvent};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::info;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised during SDK initialization.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required field is missing or empty.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What failed validation.
        reason: String,
    },

    /// `init` was called a second time.
    #[error("the SDK is already initialized")]
    AlreadyInitialized,
}

// ---------------------------------------------------------------------------
// DriftConfig
// ---------------------------------------------------------------------------

/// Options supplied by the host at initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftConfig {
    /// API key identifying the host application.
    pub api_key: String,
    /// Deployment environment label (e.g. `"staging"`).
    pub env: String,
    /// Log level for the SDK's own tracing output (e.g. `"info"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl DriftConfig {
    /// Config with the two required fields.
    #[must_use]
    pub fn new(api_key: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            env: env.into(),
            log_level: None,
        }
    }

    /// Set the log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "api_key must not be empty".into(),
            });
        }
        if self.env.trim().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "env must not be empty".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DriftRuntime
// ---------------------------------------------------------------------------

/// Everything the SDK wires together at init, immutable afterwards.
pub struct DriftRuntime {
    config: DriftConfig,
    kernel: SpanKernel,
    gate: ModeGate,
    registry: Arc<PatchRegistry>,
    telemetry: TelemetryClient,
}

impl DriftRuntime {
    /// Build a runtime from explicit parts. Hosts normally go through
    /// [`init`]; tests build isolated runtimes directly.
    pub fn build(config: DriftConfig, mode: Mode) -> Result<Self, ConfigError> {
        config.validate()?;
        let telemetry = TelemetryClient::from_env();
        let registry = Arc::new(PatchRegistry::new(telemetry.clone()));
        telemetry.emit(TelemetryEvent::SdkInitialized {
            mode: mode.to_string(),
        });
        Ok(Self {
            config,
            kernel: SpanKernel::new(),
            gate: ModeGate::new(mode),
            registry,
            telemetry,
        })
    }

    /// The host-supplied configuration.
    #[must_use]
    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// The span kernel; register exporters and processors here.
    #[must_use]
    pub fn kernel(&self) -> &SpanKernel {
        &self.kernel
    }

    /// The mode gate adapters route through.
    #[must_use]
    pub fn gate(&self) -> &ModeGate {
        &self.gate
    }

    /// The patch registry; adapters register their modules here.
    #[must_use]
    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    /// The telemetry client.
    #[must_use]
    pub fn telemetry(&self) -> &TelemetryClient {
        &self.telemetry
    }

    /// Close the pre-app-start window. One-way.
    pub fn mark_app_as_ready(&self) {
        self.gate.mark_app_as_ready();
        info!("app marked ready; pre-app-start window closed");
    }
}

// ---------------------------------------------------------------------------
// Global init
// ---------------------------------------------------------------------------

static RUNTIME: OnceLock<DriftRuntime> = OnceLock::new();

/// Initialize the process-global runtime.
///
/// Reads the mode from `TUSK_DRIFT_MODE` and installs a `tracing`
/// subscriber honoring `config.log_level` (the `RUST_LOG` environment
/// variable wins when set). Calling `init` twice is an error; the first
/// runtime stays in place.
pub fn init(config: DriftConfig) -> Result<&'static DriftRuntime, ConfigError> {
    config.validate()?;
    init_tracing(config.log_level.as_deref());
    let runtime = DriftRuntime::build(config, Mode::from_env())?;
    RUNTIME
        .set(runtime)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    Ok(RUNTIME.get().expect("runtime just set"))
}

/// The global runtime, when [`init`] has run.
#[must_use]
pub fn runtime() -> Option<&'static DriftRuntime> {
    RUNTIME.get()
}

/// Close the pre-app-start window on the global runtime.
///
/// No-op (with a warning) before [`init`].
pub fn mark_app_as_ready() {
    match RUNTIME.get() {
        Some(runtime) => runtime.mark_app_as_ready(),
        None => tracing::warn!("mark_app_as_ready called before init; ignored"),
    }
}

fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.unwrap_or("info")));
    // A host may have installed its own subscriber; losing that race is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
