//! Instrumentation interface for the fake primitives.
//!
//! The surrounding test framework wires a function-instrumentation facility
//! in front of every fake so tests can assert on how code under test used
//! the scheduling primitives. Only the recording interface is consumed here:
//! each fake reports itself to the injected [`CallObserver`] before it takes
//! effect.

use std::cell::RefCell;

/// One observed invocation of a fake primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveInvocation {
    /// Primitive name, as the host exposes it.
    pub name: &'static str,
    /// Raw delay argument for the set-timer family, before coercion.
    pub delay_ms: Option<f64>,
}

/// Receives every fake-primitive invocation.
pub trait CallObserver {
    /// Called before the fake acts, including on a disposed scheduler.
    fn primitive_invoked(&self, call: PrimitiveInvocation);
}

/// Observer that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl CallObserver for NullObserver {
    fn primitive_invoked(&self, _call: PrimitiveInvocation) {}
}

/// Recording observer retaining every invocation in order.
#[derive(Debug, Default)]
pub struct InvocationLog {
    calls: RefCell<Vec<PrimitiveInvocation>>,
}

impl InvocationLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total invocations recorded across all primitives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    /// Invocations recorded for one primitive name.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.name == name).count()
    }

    /// The delay passed to the most recent invocation of `name`, if any.
    #[must_use]
    pub fn last_delay(&self, name: &str) -> Option<f64> {
        self.calls
            .borrow()
            .iter()
            .rev()
            .find(|c| c.name == name)
            .and_then(|c| c.delay_ms)
    }
}

impl CallObserver for InvocationLog {
    fn primitive_invoked(&self, call: PrimitiveInvocation) {
        self.calls.borrow_mut().push(call);
    }
}
