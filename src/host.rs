//! Host-global scheduling bindings.
//!
//! The host's mutable globals are modeled as an explicit interface instead
//! of patched in place: a [`TimerApi`] table with one optional callable per
//! primitive name, and a [`HostGlobals`] trait for snapshotting and
//! rewriting the table. A `None` slot means the host does not define that
//! name; existence is probed per-name and unsupported names are never
//! written.
//!
//! [`SimulatedHost`] is an in-process implementation used by this crate's
//! own tests and as a reference for embedders binding a real runtime.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::bridge::TimerId;

/// A scheduled callback with its arguments already captured.
pub type TimerCallback = Rc<dyn Fn()>;

/// An animation-frame callback; receives the virtual clock in milliseconds.
pub type FrameCallback = Rc<dyn Fn(u64)>;

/// `set_timeout` / `set_interval` shape: callback plus delay in ms.
///
/// Returns `None` when the primitive declined to schedule (disposed fakes).
pub type SetTimerFn<R> = Rc<dyn Fn(TimerCallback, f64) -> Option<R>>;

/// `clear_timeout` / `clear_interval` / `cancel_animation_frame` shape.
pub type ClearTimerFn<R> = Rc<dyn Fn(&R)>;

/// `next_tick` shape.
pub type NextTickFn = Rc<dyn Fn(TimerCallback)>;

/// `set_immediate` shape; hands back a raw id rather than a bridged ref.
pub type SetImmediateFn = Rc<dyn Fn(TimerCallback) -> Option<TimerId>>;

/// `clear_immediate` shape.
pub type ClearImmediateFn = Rc<dyn Fn(TimerId)>;

/// `request_animation_frame` shape.
pub type RequestFrameFn<R> = Rc<dyn Fn(FrameCallback) -> Option<R>>;

/// The per-name table of scheduling callables a host exposes.
pub struct TimerApi<R> {
    pub set_timeout: Option<SetTimerFn<R>>,
    pub clear_timeout: Option<ClearTimerFn<R>>,
    pub set_interval: Option<SetTimerFn<R>>,
    pub clear_interval: Option<ClearTimerFn<R>>,
    pub next_tick: Option<NextTickFn>,
    pub set_immediate: Option<SetImmediateFn>,
    pub clear_immediate: Option<ClearImmediateFn>,
    pub request_animation_frame: Option<RequestFrameFn<R>>,
    pub cancel_animation_frame: Option<ClearTimerFn<R>>,
}

impl<R> Default for TimerApi<R> {
    fn default() -> Self {
        Self {
            set_timeout: None,
            clear_timeout: None,
            set_interval: None,
            clear_interval: None,
            next_tick: None,
            set_immediate: None,
            clear_immediate: None,
            request_animation_frame: None,
            cancel_animation_frame: None,
        }
    }
}

impl<R> Clone for TimerApi<R> {
    fn clone(&self) -> Self {
        Self {
            set_timeout: self.set_timeout.clone(),
            clear_timeout: self.clear_timeout.clone(),
            set_interval: self.set_interval.clone(),
            clear_interval: self.clear_interval.clone(),
            next_tick: self.next_tick.clone(),
            set_immediate: self.set_immediate.clone(),
            clear_immediate: self.clear_immediate.clone(),
            request_animation_frame: self.request_animation_frame.clone(),
            cancel_animation_frame: self.cancel_animation_frame.clone(),
        }
    }
}

impl<R> TimerApi<R> {
    /// Overlay the `Some` slots of `other` onto `self`.
    ///
    /// `None` slots in `other` leave the current binding untouched, so a
    /// host never gains a primitive it did not define.
    pub fn apply(&mut self, other: &Self) {
        if let Some(slot) = &other.set_timeout {
            self.set_timeout = Some(Rc::clone(slot));
        }
        if let Some(slot) = &other.clear_timeout {
            self.clear_timeout = Some(Rc::clone(slot));
        }
        if let Some(slot) = &other.set_interval {
            self.set_interval = Some(Rc::clone(slot));
        }
        if let Some(slot) = &other.clear_interval {
            self.clear_interval = Some(Rc::clone(slot));
        }
        if let Some(slot) = &other.next_tick {
            self.next_tick = Some(Rc::clone(slot));
        }
        if let Some(slot) = &other.set_immediate {
            self.set_immediate = Some(Rc::clone(slot));
        }
        if let Some(slot) = &other.clear_immediate {
            self.clear_immediate = Some(Rc::clone(slot));
        }
        if let Some(slot) = &other.request_animation_frame {
            self.request_animation_frame = Some(Rc::clone(slot));
        }
        if let Some(slot) = &other.cancel_animation_frame {
            self.cancel_animation_frame = Some(Rc::clone(slot));
        }
    }

    /// Whether both tables currently share the same `set_timeout` binding.
    ///
    /// Pointer identity, not behavioral equivalence; this is the probe the
    /// drain operations use to detect that fakes are installed.
    #[must_use]
    pub fn shares_set_timeout(&self, other: &Self) -> bool {
        match (&self.set_timeout, &other.set_timeout) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Read/write access to a host's scheduling globals.
pub trait HostGlobals {
    /// The opaque timer handle the host's set-timer primitives return.
    type Ref: Clone + 'static;

    /// Snapshot the currently-bound primitive table.
    fn bindings(&self) -> TimerApi<Self::Ref>;

    /// Write the `Some` slots of `api` into the host's globals.
    fn install(&self, api: &TimerApi<Self::Ref>);
}

/// An in-process host with integer timer handles.
///
/// Its initial "real" primitives never consult a wall clock: set-timer calls
/// are counted and handed a fresh handle, while next-tick and immediate
/// callbacks are parked in a deferred queue that [`run_deferred`] flushes,
/// playing the role of the host's event loop turning over.
///
/// [`run_deferred`]: SimulatedHost::run_deferred
pub struct SimulatedHost {
    bindings: RefCell<TimerApi<u64>>,
    deferred: Rc<RefCell<VecDeque<TimerCallback>>>,
    real_set_timer_calls: Rc<Cell<u64>>,
}

impl SimulatedHost {
    /// Host supporting every primitive family.
    #[must_use]
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Host without the immediate and animation-frame families, for
    /// exercising per-name probing.
    #[must_use]
    pub fn minimal() -> Self {
        Self::build(false)
    }

    fn build(extras: bool) -> Self {
        let deferred: Rc<RefCell<VecDeque<TimerCallback>>> =
            Rc::new(RefCell::new(VecDeque::new()));
        let real_set_timer_calls = Rc::new(Cell::new(0u64));
        let handle_counter = Rc::new(Cell::new(0u64));

        let mut api = TimerApi::default();

        let calls = Rc::clone(&real_set_timer_calls);
        let handles = Rc::clone(&handle_counter);
        api.set_timeout = Some(Rc::new(move |_cb, _delay| {
            calls.set(calls.get() + 1);
            handles.set(handles.get() + 1);
            Some(handles.get())
        }));
        api.clear_timeout = Some(Rc::new(|_handle| {}));

        let calls = Rc::clone(&real_set_timer_calls);
        let handles = Rc::clone(&handle_counter);
        api.set_interval = Some(Rc::new(move |_cb, _delay| {
            calls.set(calls.get() + 1);
            handles.set(handles.get() + 1);
            Some(handles.get())
        }));
        api.clear_interval = Some(Rc::new(|_handle| {}));

        let queue = Rc::clone(&deferred);
        api.next_tick = Some(Rc::new(move |cb| {
            queue.borrow_mut().push_back(cb);
        }));

        if extras {
            let queue = Rc::clone(&deferred);
            let handles = Rc::clone(&handle_counter);
            api.set_immediate = Some(Rc::new(move |cb| {
                queue.borrow_mut().push_back(cb);
                handles.set(handles.get() + 1);
                Some(TimerId::from_raw(handles.get()))
            }));
            api.clear_immediate = Some(Rc::new(|_id| {}));

            let calls = Rc::clone(&real_set_timer_calls);
            let handles = Rc::clone(&handle_counter);
            api.request_animation_frame = Some(Rc::new(move |_cb| {
                calls.set(calls.get() + 1);
                handles.set(handles.get() + 1);
                Some(handles.get())
            }));
            api.cancel_animation_frame = Some(Rc::new(|_handle| {}));
        }

        Self {
            bindings: RefCell::new(api),
            deferred,
            real_set_timer_calls,
        }
    }

    /// Invoke the currently-bound `set_timeout`, as host code under test
    /// would.
    pub fn set_timeout(&self, callback: TimerCallback, delay_ms: f64) -> Option<u64> {
        let slot = self.bindings.borrow().set_timeout.clone();
        slot.and_then(|f| f(callback, delay_ms))
    }

    pub fn clear_timeout(&self, handle: u64) {
        let slot = self.bindings.borrow().clear_timeout.clone();
        if let Some(f) = slot {
            f(&handle);
        }
    }

    pub fn set_interval(&self, callback: TimerCallback, delay_ms: f64) -> Option<u64> {
        let slot = self.bindings.borrow().set_interval.clone();
        slot.and_then(|f| f(callback, delay_ms))
    }

    pub fn clear_interval(&self, handle: u64) {
        let slot = self.bindings.borrow().clear_interval.clone();
        if let Some(f) = slot {
            f(&handle);
        }
    }

    pub fn next_tick(&self, callback: TimerCallback) {
        let slot = self.bindings.borrow().next_tick.clone();
        if let Some(f) = slot {
            f(callback);
        }
    }

    pub fn set_immediate(&self, callback: TimerCallback) -> Option<TimerId> {
        let slot = self.bindings.borrow().set_immediate.clone();
        slot.and_then(|f| f(callback))
    }

    pub fn clear_immediate(&self, id: TimerId) {
        let slot = self.bindings.borrow().clear_immediate.clone();
        if let Some(f) = slot {
            f(id);
        }
    }

    pub fn request_animation_frame(&self, callback: FrameCallback) -> Option<u64> {
        let slot = self.bindings.borrow().request_animation_frame.clone();
        slot.and_then(|f| f(callback))
    }

    pub fn cancel_animation_frame(&self, handle: u64) {
        let slot = self.bindings.borrow().cancel_animation_frame.clone();
        if let Some(f) = slot {
            f(&handle);
        }
    }

    /// Callbacks parked on the real next-tick/immediate facilities, waiting
    /// for the simulated event loop to turn.
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.deferred.borrow().len()
    }

    /// Flush the deferred queue in order, including work enqueued while
    /// flushing.
    pub fn run_deferred(&self) {
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            let Some(callback) = next else { break };
            callback();
        }
    }

    /// How many set-timer calls reached the real primitives.
    #[must_use]
    pub fn real_set_timer_calls(&self) -> u64 {
        self.real_set_timer_calls.get()
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostGlobals for SimulatedHost {
    type Ref = u64;

    fn bindings(&self) -> TimerApi<u64> {
        self.bindings.borrow().clone()
    }

    fn install(&self, api: &TimerApi<u64>) {
        self.bindings.borrow_mut().apply(api);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_set_timeout_mints_handles() {
        let host = SimulatedHost::new();
        let first = host.set_timeout(Rc::new(|| {}), 100.0);
        let second = host.set_timeout(Rc::new(|| {}), 100.0);
        assert!(first.is_some());
        assert_ne!(first, second);
        assert_eq!(host.real_set_timer_calls(), 2);
    }

    #[test]
    fn minimal_host_lacks_extras() {
        let host = SimulatedHost::minimal();
        let api = host.bindings();
        assert!(api.set_timeout.is_some());
        assert!(api.next_tick.is_some());
        assert!(api.set_immediate.is_none());
        assert!(api.request_animation_frame.is_none());
        assert_eq!(host.set_immediate(Rc::new(|| {})), None);
        assert_eq!(host.request_animation_frame(Rc::new(|_| {})), None);
    }

    #[test]
    fn deferred_queue_flushes_in_order() {
        let host = SimulatedHost::new();
        let order: Rc<RefCell<Vec<u32>>> = Rc::default();

        let seen = Rc::clone(&order);
        host.next_tick(Rc::new(move || seen.borrow_mut().push(1)));
        let seen = Rc::clone(&order);
        host.set_immediate(Rc::new(move || seen.borrow_mut().push(2)));

        assert_eq!(host.deferred_len(), 2);
        host.run_deferred();
        assert_eq!(*order.borrow(), vec![1, 2]);
        assert_eq!(host.deferred_len(), 0);
    }

    #[test]
    fn run_deferred_picks_up_reentrant_work() {
        let host = Rc::new(SimulatedHost::new());
        let order: Rc<RefCell<Vec<u32>>> = Rc::default();

        let seen = Rc::clone(&order);
        let reenter = Rc::clone(&host);
        host.next_tick(Rc::new(move || {
            seen.borrow_mut().push(1);
            let seen = Rc::clone(&seen);
            reenter.next_tick(Rc::new(move || seen.borrow_mut().push(2)));
        }));

        host.run_deferred();
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn apply_overlays_only_some_slots() {
        let host = SimulatedHost::new();
        let before = host.bindings();

        let mut patch = TimerApi::default();
        patch.set_timeout = Some(Rc::new(|_cb, _delay| Some(99)));
        host.install(&patch);

        let after = host.bindings();
        assert!(!after.shares_set_timeout(&before));
        // Untouched slots keep their original bindings.
        assert!(matches!(
            (&after.next_tick, &before.next_tick),
            (Some(a), Some(b)) if Rc::ptr_eq(a, b)
        ));
        assert_eq!(host.set_timeout(Rc::new(|| {}), 5.0), Some(99));
    }

    #[test]
    fn shares_set_timeout_is_pointer_identity() {
        let host = SimulatedHost::new();
        let a = host.bindings();
        let b = host.bindings();
        assert!(a.shares_set_timeout(&b));
        assert!(!a.shares_set_timeout(&TimerApi::default()));
    }
}
