// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! drift-transform
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The engine applying compiled rules to ended spans.
pub mod engine;
/// Dotted/JSONPath-style body paths and URL field helpers.
pub mod paths;
/// Rule model and compilation.
pub mod rules;

pub use engine::CompiledRuleSet;
pub use rules::{
    CompileError, Direction, FieldTarget, RuleMatcher, TransformAction, TransformRule,
};
