// SPDX-License-Identifier: MIT OR Apache-2.0
//! Idempotent method replacement.
//!
//! A [`MethodSlot`] holds a callable the way an exports object holds a
//! method: it can be wrapped with an interceptor that retains the original,
//! re-wrapping is a no-op, and unwrapping restores the original exactly.
//! Errors raised by the original propagate through the wrapper unchanged:
//! the wrapper adds behavior around the call, never between the caller and
//! the original's outcome.

use std::sync::Arc;
use tracing::debug;

/// Shared callable stored in a slot.
pub type SlotFn<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// A named method slot supporting idempotent wrap/unwrap.
pub struct MethodSlot<A, R> {
    name: &'static str,
    current: SlotFn<A, R>,
    original: Option<SlotFn<A, R>>,
}

impl<A, R> MethodSlot<A, R> {
    /// A slot holding `f` as the (unwrapped) method.
    pub fn new(name: &'static str, f: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
        Self::from_shared(name, Arc::new(f))
    }

    /// A slot over an already-shared callable.
    ///
    /// This is how adapter patches take ownership of a transport found on
    /// the host's exports: the exports value *is* the [`SlotFn`].
    #[must_use]
    pub fn from_shared(name: &'static str, f: SlotFn<A, R>) -> Self {
        Self {
            name,
            current: f,
            original: None,
        }
    }

    /// The preserved method name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the slot currently holds a wrapper.
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        self.original.is_some()
    }

    /// Replace the method with `make(original)`.
    ///
    /// Double-wrap is a no-op: if the slot is already wrapped the existing
    /// wrapper stays in place and `make` is never called.
    pub fn wrap(&mut self, make: impl FnOnce(SlotFn<A, R>) -> SlotFn<A, R>) {
        if self.is_wrapped() {
            debug!(method = self.name, "already wrapped; keeping existing wrapper");
            return;
        }
        let original = Arc::clone(&self.current);
        self.current = make(Arc::clone(&original));
        self.original = Some(original);
    }

    /// Restore the original method. No-op when not wrapped.
    pub fn unwrap_original(&mut self) {
        if let Some(original) = self.original.take() {
            self.current = original;
        }
    }

    /// Invoke whatever the slot currently holds.
    pub fn call(&self, args: A) -> R {
        (self.current)(args)
    }

    /// Handle to whatever the slot currently holds: the wrapper once
    /// wrapped, otherwise the original. This is what an adapter patch
    /// substitutes back onto the exports.
    #[must_use]
    pub fn handle(&self) -> SlotFn<A, R> {
        Arc::clone(&self.current)
    }

    /// Handle to the pristine original, bypassing any wrapper.
    #[must_use]
    pub fn original(&self) -> SlotFn<A, R> {
        Arc::clone(self.original.as_ref().unwrap_or(&self.current))
    }
}
