//! Virtual-time scheduler core.
//!
//! Replaces the host's scheduling primitives (timeout, interval, next-tick,
//! immediate, animation-frame families) with fakes that enqueue into an
//! in-process simulated clock. Tests drive the clock explicitly: drain all
//! pending work, advance a chosen number of milliseconds, or step to the
//! next scheduled boundary.
//!
//! # Invariants
//!
//! - **I1 (monotonic clock):** virtual-now never decreases
//! - **I2 (live timers):** every stored timer has a callback and an expiry
//! - **I3 (cancelled ticks):** a cancelled tick id is gone from the pending
//!   sequence once a drain observes it
//! - **I4 (dispose):** after `dispose()` the count is 0 and fakes are no-ops
//! - **I5 (count accounting):** `timer_count()` equals timers + immediates
//!   + ticks

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::channel::oneshot;

use crate::bridge::{RefBridge, TimerId};
use crate::config::SchedulerConfig;
use crate::diagnostics;
use crate::error::{DrainKind, Error, Result};
use crate::future::TimeoutFuture;
use crate::host::{FrameCallback, HostGlobals, TimerApi, TimerCallback};
use crate::mocker::{CallObserver, PrimitiveInvocation};

/// Delay used by the animation-frame fake, in milliseconds.
const FRAME_INTERVAL_MS: f64 = 1000.0 / 60.0;

/// What a stored timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Timeout,
    Interval,
}

/// A stored one-shot or periodic timer.
struct Timer {
    kind: TimerKind,
    callback: TimerCallback,
    expiry_ms: u64,
    /// Period length; present iff `kind` is `Interval`.
    interval_ms: Option<u64>,
}

/// A pending next-tick callback.
struct Tick {
    id: TimerId,
    callback: TimerCallback,
}

/// A pending immediate callback.
struct Immediate {
    id: TimerId,
    callback: TimerCallback,
}

/// Truncate a host-supplied delay to a non-negative 32-bit millisecond
/// count. The float-to-int cast saturates and maps NaN to 0, so negative and
/// non-numeric delays both coerce to 0.
fn coerce_delay(delay: f64) -> u64 {
    let truncated = delay as i32;
    if truncated <= 0 {
        0
    } else {
        truncated as u64
    }
}

/// Mutable scheduler state.
///
/// All access goes through short-lived borrows; no borrow is ever held
/// across a callback invocation, so callbacks may reenter the fakes.
struct State {
    now_ms: u64,
    next_id: u64,
    timers: BTreeMap<TimerId, Timer>,
    ticks: VecDeque<Tick>,
    immediates: VecDeque<Immediate>,
    cancelled_ticks: HashSet<TimerId>,
    disposed: bool,
}

impl State {
    fn new() -> Self {
        Self {
            now_ms: 0,
            next_id: 1,
            timers: BTreeMap::new(),
            ticks: VecDeque::new(),
            immediates: VecDeque::new(),
            cancelled_ticks: HashSet::new(),
            disposed: false,
        }
    }

    fn mint_id(&mut self) -> TimerId {
        let id = TimerId::from_raw(self.next_id);
        self.next_id += 1;
        id
    }

    fn work_count(&self) -> usize {
        self.timers.len() + self.immediates.len() + self.ticks.len()
    }

    /// Earliest-expiry timer and its expiry; ties resolve to the lowest id,
    /// which equals insertion order.
    fn next_timer(&self) -> Option<(TimerId, u64)> {
        let mut best: Option<(TimerId, u64)> = None;
        for (id, timer) in &self.timers {
            match best {
                Some((_, expiry)) if timer.expiry_ms >= expiry => {}
                _ => best = Some((*id, timer.expiry_ms)),
            }
        }
        best
    }
}

/// Virtual-time replacement for the host's scheduling primitives.
///
/// Construction captures the host's current bindings as the "real" set;
/// [`use_fake_timers`](Self::use_fake_timers) swaps the fakes in and
/// [`use_real_timers`](Self::use_real_timers) swaps them back out. While the
/// fakes are installed, all registrations land in internal queues that only
/// the drain operations empty.
pub struct FakeScheduler<H: HostGlobals> {
    inner: Rc<Inner<H>>,
}

struct Inner<H: HostGlobals> {
    host: Rc<H>,
    observer: Rc<dyn CallObserver>,
    bridge: Rc<dyn RefBridge<H::Ref>>,
    config: SchedulerConfig,
    /// Host bindings captured at construction.
    originals: TimerApi<H::Ref>,
    /// Fake bindings, built lazily on first install.
    fakes: RefCell<Option<TimerApi<H::Ref>>>,
    state: RefCell<State>,
}

/// Restores a snapshot of host bindings when dropped, so a panicking
/// closure inside [`FakeScheduler::run_with_real_timers`] cannot leave the
/// real primitives installed.
struct RestoreGuard<H: HostGlobals> {
    host: Rc<H>,
    snapshot: TimerApi<H::Ref>,
}

impl<H: HostGlobals> Drop for RestoreGuard<H> {
    fn drop(&mut self) {
        self.host.install(&self.snapshot);
    }
}

impl<H: HostGlobals + 'static> FakeScheduler<H> {
    /// Capture the host's current bindings and build an idle scheduler.
    ///
    /// Nothing is installed yet; call
    /// [`use_fake_timers`](Self::use_fake_timers) to swap the fakes in.
    #[must_use]
    pub fn new(
        host: Rc<H>,
        observer: Rc<dyn CallObserver>,
        bridge: Rc<dyn RefBridge<H::Ref>>,
        config: SchedulerConfig,
    ) -> Self {
        let originals = host.bindings();
        Self {
            inner: Rc::new(Inner {
                host,
                observer,
                bridge,
                config,
                originals,
                fakes: RefCell::new(None),
                state: RefCell::new(State::new()),
            }),
        }
    }

    /// Install the fake primitives into the host globals.
    ///
    /// Fakes exist only for the names the host defined at construction;
    /// unsupported names are left alone.
    pub fn use_fake_timers(&self) {
        let fakes = self.inner.fake_apis();
        self.inner.host.install(&fakes);
        tracing::debug!(event = "scheduler.install.fake", "Fake timer APIs installed");
    }

    /// Write the captured original primitives back into the host globals.
    pub fn use_real_timers(&self) {
        self.inner.host.install(&self.inner.originals);
        tracing::debug!(event = "scheduler.install.real", "Original timer APIs restored");
    }

    /// Run `f` with the original primitives temporarily reinstalled.
    ///
    /// The previously-installed bindings are snapshotted up front and
    /// restored unconditionally, including when `f` panics. Virtual time
    /// does not advance during `f`.
    pub fn run_with_real_timers<T>(&self, f: impl FnOnce() -> T) -> T {
        let snapshot = self.inner.host.bindings();
        self.inner.host.install(&self.inner.originals);
        let _restore = RestoreGuard {
            host: Rc::clone(&self.inner.host),
            snapshot,
        };
        f()
    }

    /// Drain the next-tick queue to completion.
    ///
    /// # Errors
    ///
    /// [`Error::LoopLimitExceeded`] with kind `ticks` when callbacks keep
    /// scheduling further ticks past the configured bound.
    pub fn run_all_ticks(&self) -> Result<()> {
        self.inner.check_fakes_installed();
        self.inner.drain_ticks()
    }

    /// Drain the immediate queue to completion.
    ///
    /// # Errors
    ///
    /// [`Error::LoopLimitExceeded`] with kind `immediates` on runaway
    /// scheduling.
    pub fn run_all_immediates(&self) -> Result<()> {
        self.inner.check_fakes_installed();
        self.inner.drain_immediates()
    }

    /// Fire everything: ticks, then immediates, then timers in expiry
    /// order, re-draining ticks and immediates between timer firings.
    ///
    /// Virtual-now is deliberately left where it was; a full drain fires
    /// pending timers regardless of the gaps between their expiries.
    ///
    /// # Errors
    ///
    /// [`Error::LoopLimitExceeded`] when any of the three phases exceeds the
    /// bound. An interval can never be drained this way and ends with kind
    /// `timers`.
    pub fn run_all_timers(&self) -> Result<()> {
        self.inner.run_all_timers()
    }

    /// Fire only the timers that are already pending, in expiry order.
    ///
    /// Timers scheduled by the callbacks of this drain are not run;
    /// intervals still re-arm themselves for a later call. Immediates are
    /// drained first.
    ///
    /// # Errors
    ///
    /// [`Error::LoopLimitExceeded`] with kind `immediates` from the leading
    /// immediate drain.
    pub fn run_only_pending_timers(&self) -> Result<()> {
        self.inner.run_only_pending_timers()
    }

    /// Advance the virtual clock by `ms`, firing every timer whose expiry
    /// falls inside the window, in expiry order.
    ///
    /// # Errors
    ///
    /// [`Error::LoopLimitExceeded`] with kind `timers`; a zero-length
    /// interval burns one loop iteration per refire and trips this rather
    /// than wedging.
    pub fn advance_timers_by_time(&self, ms: u64) -> Result<()> {
        self.inner.advance_timers_by_time(ms)
    }

    /// Advance to the next timer boundary, `steps` times.
    ///
    /// Each step jumps the clock to the earliest stored expiry and fires
    /// everything due there. Stops early when no timers remain.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::LoopLimitExceeded`] from the underlying advance.
    pub fn advance_timers_to_next_timer(&self, steps: u32) -> Result<()> {
        for _ in 0..steps {
            let delta = {
                let state = self.inner.state.borrow();
                state
                    .next_timer()
                    .map(|(_, expiry)| expiry.saturating_sub(state.now_ms))
            };
            match delta {
                None => return Ok(()),
                Some(delta) => self.inner.advance_timers_by_time(delta)?,
            }
        }
        Ok(())
    }

    /// Outstanding work: timers + immediates + ticks.
    #[must_use]
    pub fn timer_count(&self) -> usize {
        self.inner.state.borrow().work_count()
    }

    /// Current virtual clock reading in milliseconds.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.inner.state.borrow().now_ms
    }

    /// Empty all three work containers.
    ///
    /// Virtual-now and the cancelled-ticks set are left untouched.
    pub fn clear_all_timers(&self) {
        let mut state = self.inner.state.borrow_mut();
        state.timers.clear();
        state.immediates.clear();
        state.ticks.clear();
        tracing::debug!(event = "scheduler.lifecycle.clear", "All timers cleared");
    }

    /// Return to the initial state: clock at 0, containers empty,
    /// cancelled-ticks forgotten. Ids keep counting up.
    pub fn reset(&self) {
        let mut state = self.inner.state.borrow_mut();
        state.now_ms = 0;
        state.timers.clear();
        state.immediates.clear();
        state.ticks.clear();
        state.cancelled_ticks.clear();
        tracing::debug!(event = "scheduler.lifecycle.reset", "Scheduler reset");
    }

    /// Terminate the scheduler: every fake becomes a no-op returning `None`
    /// and all queued work is dropped.
    pub fn dispose(&self) {
        self.inner.state.borrow_mut().disposed = true;
        self.clear_all_timers();
        tracing::debug!(event = "scheduler.lifecycle.dispose", "Scheduler disposed");
    }

    /// Schedule a fake timeout that resolves the returned future with
    /// `value` when it fires.
    ///
    /// If the backing timer is cleared, reset, or disposed first, the future
    /// resolves to [`Error::TimeoutDropped`].
    pub fn timeout_future<T: 'static>(&self, delay_ms: f64, value: T) -> TimeoutFuture<T> {
        let (sender, receiver) = oneshot::channel();
        let slot = RefCell::new(Some((sender, value)));
        let callback: TimerCallback = Rc::new(move || {
            if let Some((sender, value)) = slot.borrow_mut().take() {
                let _ = sender.send(value);
            }
        });
        let _ = self.inner.schedule_timeout(callback, delay_ms);
        TimeoutFuture::new(receiver)
    }
}

impl<H: HostGlobals + 'static> Inner<H> {
    fn observe(&self, name: &'static str, delay_ms: Option<f64>) {
        self.observer
            .primitive_invoked(PrimitiveInvocation { name, delay_ms });
    }

    // ─── Fake primitive table ───────────────────────────────────────────────

    fn fake_apis(self: &Rc<Self>) -> TimerApi<H::Ref> {
        if let Some(apis) = self.fakes.borrow().as_ref() {
            return apis.clone();
        }
        let apis = self.build_fakes();
        *self.fakes.borrow_mut() = Some(apis.clone());
        apis
    }

    /// Build one fake per name the host supported at construction.
    fn build_fakes(self: &Rc<Self>) -> TimerApi<H::Ref> {
        let mut apis = TimerApi::default();
        let weak = Rc::downgrade(self);

        if self.originals.set_timeout.is_some() {
            let inner = Weak::clone(&weak);
            apis.set_timeout = Some(Rc::new(move |cb, delay| {
                inner.upgrade().and_then(|inner| inner.fake_set_timeout(cb, delay))
            }));
        }
        if self.originals.clear_timeout.is_some() {
            let inner = Weak::clone(&weak);
            apis.clear_timeout = Some(Rc::new(move |handle| {
                if let Some(inner) = inner.upgrade() {
                    inner.fake_clear_timer("clear_timeout", handle);
                }
            }));
        }
        if self.originals.set_interval.is_some() {
            let inner = Weak::clone(&weak);
            apis.set_interval = Some(Rc::new(move |cb, delay| {
                inner.upgrade().and_then(|inner| inner.fake_set_interval(cb, delay))
            }));
        }
        if self.originals.clear_interval.is_some() {
            let inner = Weak::clone(&weak);
            apis.clear_interval = Some(Rc::new(move |handle| {
                if let Some(inner) = inner.upgrade() {
                    inner.fake_clear_timer("clear_interval", handle);
                }
            }));
        }
        if self.originals.next_tick.is_some() {
            let inner = Weak::clone(&weak);
            apis.next_tick = Some(Rc::new(move |cb| {
                if let Some(inner) = inner.upgrade() {
                    inner.fake_next_tick(cb);
                }
            }));
        }
        if self.originals.set_immediate.is_some() {
            let inner = Weak::clone(&weak);
            apis.set_immediate = Some(Rc::new(move |cb| {
                inner.upgrade().and_then(|inner| inner.fake_set_immediate(cb))
            }));
        }
        if self.originals.clear_immediate.is_some() {
            let inner = Weak::clone(&weak);
            apis.clear_immediate = Some(Rc::new(move |id| {
                if let Some(inner) = inner.upgrade() {
                    inner.fake_clear_immediate(id);
                }
            }));
        }
        if self.originals.request_animation_frame.is_some() {
            let inner = Weak::clone(&weak);
            apis.request_animation_frame = Some(Rc::new(move |cb| {
                inner
                    .upgrade()
                    .and_then(|inner| inner.fake_request_animation_frame(cb))
            }));
        }
        if self.originals.cancel_animation_frame.is_some() {
            let inner = Weak::clone(&weak);
            apis.cancel_animation_frame = Some(Rc::new(move |handle| {
                if let Some(inner) = inner.upgrade() {
                    inner.fake_clear_timer("cancel_animation_frame", handle);
                }
            }));
        }

        apis
    }

    // ─── Fake primitive bodies ──────────────────────────────────────────────

    /// Store a timeout without reporting to the observer; shared by the
    /// set-timeout fake, the animation-frame fake, and the future adapter.
    fn schedule_timeout(self: &Rc<Self>, callback: TimerCallback, delay: f64) -> Option<H::Ref> {
        let mut state = self.state.borrow_mut();
        if state.disposed {
            return None;
        }
        let delay_ms = coerce_delay(delay);
        let id = state.mint_id();
        let expiry_ms = state.now_ms.saturating_add(delay_ms);
        state.timers.insert(
            id,
            Timer {
                kind: TimerKind::Timeout,
                callback,
                expiry_ms,
                interval_ms: None,
            },
        );
        tracing::trace!(
            event = "scheduler.timeout.set",
            id = %id,
            delay_ms,
            expiry_ms,
            "Timeout scheduled"
        );
        Some(self.bridge.id_to_ref(id))
    }

    fn fake_set_timeout(self: &Rc<Self>, callback: TimerCallback, delay: f64) -> Option<H::Ref> {
        self.observe("set_timeout", Some(delay));
        self.schedule_timeout(callback, delay)
    }

    fn fake_set_interval(self: &Rc<Self>, callback: TimerCallback, delay: f64) -> Option<H::Ref> {
        self.observe("set_interval", Some(delay));
        let mut state = self.state.borrow_mut();
        if state.disposed {
            return None;
        }
        let interval_ms = coerce_delay(delay);
        let id = state.mint_id();
        let expiry_ms = state.now_ms.saturating_add(interval_ms);
        state.timers.insert(
            id,
            Timer {
                kind: TimerKind::Interval,
                callback,
                expiry_ms,
                interval_ms: Some(interval_ms),
            },
        );
        tracing::trace!(
            event = "scheduler.interval.set",
            id = %id,
            interval_ms,
            expiry_ms,
            "Interval scheduled"
        );
        Some(self.bridge.id_to_ref(id))
    }

    /// Shared by `clear_timeout`, `clear_interval`, and
    /// `cancel_animation_frame`. Unknown refs are a no-op.
    fn fake_clear_timer(&self, name: &'static str, handle: &H::Ref) {
        self.observe(name, None);
        let Some(id) = self.bridge.ref_to_id(handle) else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if state.disposed {
            return;
        }
        if state.timers.remove(&id).is_some() {
            tracing::trace!(event = "scheduler.timer.clear", id = %id, "Timer cleared");
        }
    }

    /// Enqueue a tick and arm the real next-tick facility as a safety net:
    /// a tick that is never drained virtually still runs when the host's
    /// event loop turns. The cancelled-ticks set keeps the two sides from
    /// both running it.
    fn fake_next_tick(self: &Rc<Self>, callback: TimerCallback) {
        self.observe("next_tick", None);
        let backup = self.originals.next_tick.clone();
        let id = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return;
            }
            let id = state.mint_id();
            state.ticks.push_back(Tick {
                id,
                callback: Rc::clone(&callback),
            });
            id
        };
        tracing::trace!(event = "scheduler.tick.set", id = %id, "Tick scheduled");

        if let Some(real_next_tick) = backup {
            let weak = Rc::downgrade(self);
            real_next_tick(Rc::new(move || {
                let Some(inner) = weak.upgrade() else { return };
                let run = {
                    let mut state = inner.state.borrow_mut();
                    !state.disposed && state.cancelled_ticks.insert(id)
                };
                if run {
                    tracing::trace!(
                        event = "scheduler.tick.backup_run",
                        id = %id,
                        "Tick ran via real next-tick"
                    );
                    callback();
                }
            }));
        }
    }

    /// Enqueue an immediate and arm the real immediate facility; the backup
    /// runs the callback only while the fake record is still present, then
    /// removes it.
    fn fake_set_immediate(self: &Rc<Self>, callback: TimerCallback) -> Option<TimerId> {
        self.observe("set_immediate", None);
        let backup = self.originals.set_immediate.clone();
        let id = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return None;
            }
            let id = state.mint_id();
            state.immediates.push_back(Immediate {
                id,
                callback: Rc::clone(&callback),
            });
            id
        };
        tracing::trace!(event = "scheduler.immediate.set", id = %id, "Immediate scheduled");

        if let Some(real_set_immediate) = backup {
            let weak = Rc::downgrade(self);
            let _ = real_set_immediate(Rc::new(move || {
                let Some(inner) = weak.upgrade() else { return };
                let present = {
                    let state = inner.state.borrow();
                    !state.disposed && state.immediates.iter().any(|imm| imm.id == id)
                };
                if present {
                    tracing::trace!(
                        event = "scheduler.immediate.backup_run",
                        id = %id,
                        "Immediate ran via real set-immediate"
                    );
                    inner.run_immediate_callback(id, &callback);
                }
            }));
        }
        Some(id)
    }

    fn fake_clear_immediate(&self, id: TimerId) {
        self.observe("clear_immediate", None);
        let mut state = self.state.borrow_mut();
        if state.disposed {
            return;
        }
        state.immediates.retain(|imm| imm.id != id);
    }

    /// Equivalent to `set_timeout(|| cb(virtual_now), 1000/60)`; the
    /// callback receives the virtual clock in ms, read at fire time.
    fn fake_request_animation_frame(self: &Rc<Self>, callback: FrameCallback) -> Option<H::Ref> {
        self.observe("request_animation_frame", None);
        let weak = Rc::downgrade(self);
        let wrapped: TimerCallback = Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                let now_ms = inner.state.borrow().now_ms;
                callback(now_ms);
            }
        });
        self.schedule_timeout(wrapped, FRAME_INTERVAL_MS)
    }

    /// Invoke an immediate's callback; its record is removed even when the
    /// callback panics.
    fn run_immediate_callback(self: &Rc<Self>, id: TimerId, callback: &TimerCallback) {
        struct RemoveOnDrop<H: HostGlobals> {
            inner: Rc<Inner<H>>,
            id: TimerId,
        }
        impl<H: HostGlobals> Drop for RemoveOnDrop<H> {
            fn drop(&mut self) {
                let mut state = self.inner.state.borrow_mut();
                state.immediates.retain(|imm| imm.id != self.id);
            }
        }

        let _remove = RemoveOnDrop {
            inner: Rc::clone(self),
            id,
        };
        callback();
    }

    // ─── Drains ─────────────────────────────────────────────────────────────

    /// Warn (non-fatally) when a drain is requested while the host still has
    /// the real primitives bound.
    fn check_fakes_installed(&self) {
        let installed = {
            let fakes = self.fakes.borrow();
            match fakes.as_ref() {
                Some(apis) => self.host.bindings().shares_set_timeout(apis),
                None => false,
            }
        };
        if !installed {
            let stack = diagnostics::capture_stack(&self.config.stack_trace);
            tracing::warn!(
                event = "scheduler.drain.not_installed",
                stack = %stack,
                "A timer drain was requested but the fake timer APIs are not installed; \
                 call use_fake_timers() first"
            );
        }
    }

    fn drain_ticks(&self) -> Result<()> {
        let max_loops = self.config.max_loops;
        for _ in 0..max_loops {
            let runnable = {
                let mut state = self.state.borrow_mut();
                match state.ticks.pop_front() {
                    None => return Ok(()),
                    Some(tick) => {
                        // Mark cancelled before invoking so the backup real
                        // next-tick handler skips this id.
                        if state.cancelled_ticks.insert(tick.id) {
                            Some(tick)
                        } else {
                            None
                        }
                    }
                }
            };
            if let Some(tick) = runnable {
                tracing::trace!(event = "scheduler.tick.run", id = %tick.id, "Tick fired");
                (tick.callback)();
            }
        }
        Err(Error::loop_limit(DrainKind::Ticks, max_loops))
    }

    fn drain_immediates(self: &Rc<Self>) -> Result<()> {
        let max_loops = self.config.max_loops;
        for _ in 0..max_loops {
            let next = {
                let state = self.state.borrow();
                state
                    .immediates
                    .front()
                    .map(|imm| (imm.id, Rc::clone(&imm.callback)))
            };
            let Some((id, callback)) = next else {
                return Ok(());
            };
            tracing::trace!(event = "scheduler.immediate.run", id = %id, "Immediate fired");
            self.run_immediate_callback(id, &callback);
        }
        Err(Error::loop_limit(DrainKind::Immediates, max_loops))
    }

    fn run_all_timers(self: &Rc<Self>) -> Result<()> {
        self.check_fakes_installed();
        self.drain_ticks()?;
        self.drain_immediates()?;

        let max_loops = self.config.max_loops;
        for _ in 0..max_loops {
            let next = {
                let state = self.state.borrow();
                state.next_timer()
            };
            let Some((handle, _)) = next else {
                return Ok(());
            };
            self.run_timer_handle(handle)?;
            // Work scheduled by the timer runs before the next timer does.
            self.drain_ticks()?;
            self.drain_immediates()?;
        }
        Err(Error::loop_limit(DrainKind::Timers, max_loops))
    }

    fn run_only_pending_timers(self: &Rc<Self>) -> Result<()> {
        // Snapshot before anything fires; timers scheduled during this
        // drain wait for a later one.
        let mut snapshot: Vec<(TimerId, u64)> = {
            let state = self.state.borrow();
            state
                .timers
                .iter()
                .map(|(id, timer)| (*id, timer.expiry_ms))
                .collect()
        };
        self.check_fakes_installed();
        self.drain_immediates()?;

        // Stable sort: equal expiries keep ascending-id (insertion) order.
        snapshot.sort_by_key(|&(_, expiry)| expiry);
        for (handle, expiry) in snapshot {
            {
                let mut state = self.state.borrow_mut();
                state.now_ms = state.now_ms.max(expiry);
            }
            self.run_timer_handle(handle)?;
        }
        Ok(())
    }

    fn advance_timers_by_time(self: &Rc<Self>, ms: u64) -> Result<()> {
        self.check_fakes_installed();
        let max_loops = self.config.max_loops;
        let mut remaining = ms;
        for _ in 0..max_loops {
            let due = {
                let mut state = self.state.borrow_mut();
                match state.next_timer() {
                    Some((handle, expiry))
                        if expiry <= state.now_ms.saturating_add(remaining) =>
                    {
                        let consumed = expiry.saturating_sub(state.now_ms);
                        remaining -= consumed;
                        // A late timer (expiry already behind the clock)
                        // must not pull virtual-now backwards.
                        state.now_ms = state.now_ms.max(expiry);
                        Some(handle)
                    }
                    _ => {
                        state.now_ms = state.now_ms.saturating_add(remaining);
                        None
                    }
                }
            };
            match due {
                Some(handle) => self.run_timer_handle(handle)?,
                None => {
                    tracing::debug!(
                        event = "scheduler.advance.done",
                        now_ms = self.state.borrow().now_ms,
                        "Virtual clock advanced"
                    );
                    return Ok(());
                }
            }
        }
        Err(Error::loop_limit(DrainKind::Timers, max_loops))
    }

    /// Fire one timer by id. Ids no longer in the table (cleared while
    /// queued in a snapshot) are skipped.
    ///
    /// Timeouts are removed before their callback runs; intervals are
    /// re-armed for `now + interval` before their callback runs, so state
    /// stays consistent even when the callback panics.
    fn run_timer_handle(self: &Rc<Self>, handle: TimerId) -> Result<()> {
        let callback = {
            let mut state = self.state.borrow_mut();
            let kind = match state.timers.get(&handle) {
                None => return Ok(()),
                Some(timer) => timer.kind,
            };
            match kind {
                TimerKind::Timeout => state.timers.remove(&handle).map(|timer| timer.callback),
                TimerKind::Interval => {
                    let now_ms = state.now_ms;
                    match state.timers.get_mut(&handle) {
                        None => None,
                        Some(timer) => {
                            let Some(interval_ms) = timer.interval_ms else {
                                return Err(Error::unexpected_timer_kind(handle));
                            };
                            timer.expiry_ms = now_ms.saturating_add(interval_ms);
                            Some(Rc::clone(&timer.callback))
                        }
                    }
                }
            }
        };
        if let Some(callback) = callback {
            tracing::trace!(event = "scheduler.timer.run", id = %handle, "Timer fired");
            callback();
        }
        Ok(())
    }
}

impl<H: HostGlobals> fmt::Debug for FakeScheduler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.try_borrow() {
            Ok(state) => f
                .debug_struct("FakeScheduler")
                .field("now_ms", &state.now_ms)
                .field("timers", &state.timers.len())
                .field("immediates", &state.immediates.len())
                .field("ticks", &state.ticks.len())
                .field("disposed", &state.disposed)
                .finish_non_exhaustive(),
            Err(_) => f.debug_struct("FakeScheduler").finish_non_exhaustive(),
        }
    }
}
