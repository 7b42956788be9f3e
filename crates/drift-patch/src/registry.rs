// SPDX-License-Identifier: MIT OR Apache-2.0
//! Module patch registry.
//!
//! Maps `(package name, version)` to the adapter patch that should wrap the
//! host's library handle. Registration happens once at startup;
//! `on_module_load` runs when the host hands a handle over. The registry
//! never fails a load: anything it cannot patch passes through unmodified.

use drift_telemetry::TelemetryClient;
use semver::{Version, VersionReq};
use std::any::Any;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A host library handle, opaque to the registry.
pub type Exports = Arc<dyn Any + Send + Sync>;

/// A patch function: receives the exports and the detected version, returns
/// the (possibly new) exports to hand back to the host.
pub type PatchFn = Arc<dyn Fn(Exports, Option<&Version>) -> Exports + Send + Sync>;

/// One version-gated patch for a package's top-level exports.
#[derive(Clone)]
pub struct VersionedPatch {
    /// Versions this patch supports.
    pub supported: VersionReq,
    /// The patch itself.
    pub patch: PatchFn,
}

/// A patch targeting a sub-path within the package (e.g. an internal
/// pipeline constructor), with its own version range.
#[derive(Clone)]
pub struct FilePatch {
    /// Normalized relative path inside the package.
    pub relative_path: String,
    /// Versions this patch supports.
    pub supported: VersionReq,
    /// The patch itself.
    pub patch: PatchFn,
}

/// Everything an adapter registers for one package.
#[derive(Clone)]
pub struct PatchedModule {
    /// Package name as the host identifies it.
    pub name: String,
    /// Top-level patches, tried in declaration order.
    pub patches: Vec<VersionedPatch>,
    /// File-level patches, matched by normalized relative path.
    pub file_patches: Vec<FilePatch>,
}

impl PatchedModule {
    /// A module entry with a single top-level patch.
    pub fn new(name: impl Into<String>, supported: VersionReq, patch: PatchFn) -> Self {
        Self {
            name: name.into(),
            patches: vec![VersionedPatch { supported, patch }],
            file_patches: Vec::new(),
        }
    }

    /// Append a file-level patch.
    #[must_use]
    pub fn with_file_patch(
        mut self,
        relative_path: impl Into<String>,
        supported: VersionReq,
        patch: PatchFn,
    ) -> Self {
        self.file_patches.push(FilePatch {
            relative_path: normalize_path(&relative_path.into()),
            supported,
            patch,
        });
        self
    }
}

/// Best-effort version parse: plain semver first, then short forms padded
/// with zeros, with an optional leading `v` stripped.
#[must_use]
pub fn resolve_version(raw: &str) -> Option<Version> {
    let raw = raw.trim().trim_start_matches('v');
    Version::parse(raw)
        .or_else(|_| Version::parse(&format!("{raw}.0")))
        .or_else(|_| Version::parse(&format!("{raw}.0.0")))
        .ok()
}

fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_start_matches("./")
        .to_string()
}

fn exports_identity(exports: &Exports) -> usize {
    // Fat-pointer cast keeps only the data address, which is the identity
    // the marker set needs.
    Arc::as_ptr(exports) as *const () as usize
}

// ---------------------------------------------------------------------------
// PatchRegistry
// ---------------------------------------------------------------------------

/// Process-wide patch registry.
///
/// `register` before any load; there is no removal at runtime. Load hooks
/// run on the host's initialization path, which is single-threaded in
/// practice; the marker set is still lock-guarded because it is shared
/// process state.
pub struct PatchRegistry {
    modules: Mutex<Vec<PatchedModule>>,
    markers: Mutex<HashSet<usize>>,
    telemetry: TelemetryClient,
}

impl PatchRegistry {
    /// An empty registry reporting through `telemetry`.
    #[must_use]
    pub fn new(telemetry: TelemetryClient) -> Self {
        Self {
            modules: Mutex::new(Vec::new()),
            markers: Mutex::new(HashSet::new()),
            telemetry,
        }
    }

    /// Register a module's patches.
    pub fn register(&self, module: PatchedModule) {
        self.modules.lock().expect("registry lock").push(module);
    }

    /// Whether `exports` has already been patched.
    #[must_use]
    pub fn is_patched(&self, exports: &Exports) -> bool {
        self.markers
            .lock()
            .expect("marker lock")
            .contains(&exports_identity(exports))
    }

    /// Run the matching top-level patch for a loaded package.
    ///
    /// Returns the exports to hand back to the host: patched when a
    /// registered entry covers the detected version, untouched otherwise.
    /// Re-offering already-patched exports is a no-op.
    pub fn on_module_load(
        &self,
        name: &str,
        raw_version: Option<&str>,
        exports: Exports,
    ) -> Exports {
        self.apply(name, raw_version, exports, None)
    }

    /// Run the matching file-level patch for a sub-path of a package.
    pub fn on_file_load(
        &self,
        name: &str,
        relative_path: &str,
        raw_version: Option<&str>,
        exports: Exports,
    ) -> Exports {
        self.apply(name, raw_version, exports, Some(&normalize_path(relative_path)))
    }

    fn apply(
        &self,
        name: &str,
        raw_version: Option<&str>,
        exports: Exports,
        relative_path: Option<&str>,
    ) -> Exports {
        if self.is_patched(&exports) {
            debug!(package = name, "exports already patched; returning as-is");
            return exports;
        }

        let version = raw_version.and_then(resolve_version);
        if raw_version.is_some() && version.is_none() {
            warn!(package = name, raw = raw_version, "unparseable package version");
        }

        let (registered, candidate) = {
            let modules = self.modules.lock().expect("registry lock");
            let mut registered = false;
            let candidate = modules
                .iter()
                .filter(|m| m.name == name)
                .inspect(|_| registered = true)
                .find_map(|m| self.select(m, version.as_ref(), relative_path));
            (registered, candidate)
        };

        if !registered {
            return exports;
        }

        match candidate {
            Some(patch) => {
                let patched = (patch)(exports, version.as_ref());
                self.markers
                    .lock()
                    .expect("marker lock")
                    .insert(exports_identity(&patched));
                debug!(package = name, file = relative_path, "package patched");
                patched
            }
            None => {
                match &version {
                    Some(v) => self.telemetry.version_mismatch(name, v.to_string()),
                    None => self.telemetry.version_unknown(name),
                }
                exports
            }
        }
    }

    fn select(
        &self,
        module: &PatchedModule,
        version: Option<&Version>,
        relative_path: Option<&str>,
    ) -> Option<PatchFn> {
        let version = version?;
        match relative_path {
            None => module
                .patches
                .iter()
                .find(|p| p.supported.matches(version))
                .map(|p| p.patch.clone()),
            Some(path) => module
                .file_patches
                .iter()
                .find(|p| p.relative_path == path && p.supported.matches(version))
                .map(|p| p.patch.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_telemetry::TelemetryEvent;
    use pretty_assertions::assert_eq;

    fn noop_patch() -> PatchFn {
        Arc::new(|exports, _version| exports)
    }

    fn replacing_patch(tag: &'static str) -> PatchFn {
        Arc::new(move |_exports, _version| Arc::new(tag) as Exports)
    }

    fn registry() -> (PatchRegistry, TelemetryClient) {
        let telemetry = TelemetryClient::new(true);
        (PatchRegistry::new(telemetry.clone()), telemetry)
    }

    #[test]
    fn matching_version_is_patched() {
        let (registry, _) = registry();
        registry.register(PatchedModule::new(
            "ioredis",
            VersionReq::parse(">=5, <6").unwrap(),
            replacing_patch("patched"),
        ));
        let out = registry.on_module_load("ioredis", Some("5.3.2"), Arc::new(()) as Exports);
        assert_eq!(*out.downcast_ref::<&str>().unwrap(), "patched");
        assert!(registry.is_patched(&out));
    }

    #[test]
    fn uncovered_version_passes_through_with_telemetry() {
        let (registry, telemetry) = registry();
        registry.register(PatchedModule::new(
            "ioredis",
            VersionReq::parse(">=5, <6").unwrap(),
            replacing_patch("patched"),
        ));
        let exports: Exports = Arc::new(());
        let out = registry.on_module_load("ioredis", Some("9.0.0"), exports.clone());
        assert!(Arc::ptr_eq(&out, &exports));
        assert_eq!(
            telemetry.events(),
            vec![TelemetryEvent::VersionMismatch {
                package: "ioredis".into(),
                version: "9.0.0".into()
            }]
        );
    }

    #[test]
    fn unknown_version_passes_through_with_telemetry() {
        let (registry, telemetry) = registry();
        registry.register(PatchedModule::new(
            "ioredis",
            VersionReq::parse("*").unwrap(),
            replacing_patch("patched"),
        ));
        let exports: Exports = Arc::new(());
        let out = registry.on_module_load("ioredis", None, exports.clone());
        assert!(Arc::ptr_eq(&out, &exports));
        assert_eq!(
            telemetry.events(),
            vec![TelemetryEvent::VersionUnknown {
                package: "ioredis".into()
            }]
        );
    }

    #[test]
    fn repatching_is_a_no_op() {
        let (registry, _) = registry();
        registry.register(PatchedModule::new(
            "pg",
            VersionReq::parse("8.*").unwrap(),
            replacing_patch("patched"),
        ));
        let once = registry.on_module_load("pg", Some("8.11.0"), Arc::new(()) as Exports);
        let twice = registry.on_module_load("pg", Some("8.11.0"), once.clone());
        assert!(Arc::ptr_eq(&once, &twice));
    }

    #[test]
    fn first_covering_patch_wins() {
        let (registry, _) = registry();
        let mut module = PatchedModule::new(
            "mysql2",
            VersionReq::parse(">=3, <4").unwrap(),
            replacing_patch("first"),
        );
        module.patches.push(VersionedPatch {
            supported: VersionReq::parse(">=3.5").unwrap(),
            patch: replacing_patch("second"),
        });
        registry.register(module);
        let out = registry.on_module_load("mysql2", Some("3.9.0"), Arc::new(()) as Exports);
        assert_eq!(*out.downcast_ref::<&str>().unwrap(), "first");
    }

    #[test]
    fn file_patch_matches_normalized_path() {
        let (registry, _) = registry();
        registry.register(
            PatchedModule::new("ioredis", VersionReq::parse(">=5").unwrap(), noop_patch())
                .with_file_patch(
                    "./built/Pipeline.js",
                    VersionReq::parse(">=5").unwrap(),
                    replacing_patch("pipeline"),
                ),
        );
        let out = registry.on_file_load(
            "ioredis",
            "built\\Pipeline.js",
            Some("5.4.1"),
            Arc::new(()) as Exports,
        );
        assert_eq!(*out.downcast_ref::<&str>().unwrap(), "pipeline");
    }

    #[test]
    fn unregistered_package_is_untouched_and_silent() {
        let (registry, telemetry) = registry();
        let exports: Exports = Arc::new(());
        let out = registry.on_module_load("left-pad", Some("1.3.0"), exports.clone());
        assert!(Arc::ptr_eq(&out, &exports));
        assert!(telemetry.events().is_empty());
    }

    #[test]
    fn short_versions_resolve() {
        assert_eq!(resolve_version("5.3"), Some(Version::new(5, 3, 0)));
        assert_eq!(resolve_version("5"), Some(Version::new(5, 0, 0)));
        assert_eq!(resolve_version("v1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(resolve_version("not-a-version"), None);
    }
}
