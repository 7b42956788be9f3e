// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-patch
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Module patch registry.
pub mod registry;
/// Idempotent method replacement.
pub mod wrap;

pub use registry::{Exports, FilePatch, PatchFn, PatchRegistry, PatchedModule, VersionedPatch};
pub use wrap::{MethodSlot, SlotFn};
