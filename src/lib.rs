//! Deterministic virtual-time replacements for host scheduling primitives.
//!
//! Code under test registers callbacks through the same shapes as the host's
//! real primitives (timeout, interval, next-tick, immediate, and
//! animation-frame families); while the fakes are installed those
//! registrations land in an in-process simulated clock that advances only
//! under explicit control. Tests then drain the pending work, advance a
//! chosen number of milliseconds, or step to the next scheduled boundary.
//!
//! The host's mutable globals are modeled as the [`HostGlobals`] interface;
//! [`SimulatedHost`] is an in-process implementation suitable for tests and
//! as a reference for binding a real runtime. Opaque host timer handles are
//! translated to internal ids through a [`RefBridge`].
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use fake_timers::{FakeScheduler, IntRefBridge, NullObserver, SchedulerConfig, SimulatedHost};
//!
//! let host = Rc::new(SimulatedHost::new());
//! let scheduler = FakeScheduler::new(
//!     Rc::clone(&host),
//!     Rc::new(NullObserver),
//!     Rc::new(IntRefBridge),
//!     SchedulerConfig::default(),
//! );
//! scheduler.use_fake_timers();
//!
//! let fired = Rc::new(Cell::new(false));
//! let flag = Rc::clone(&fired);
//! host.set_timeout(Rc::new(move || flag.set(true)), 250.0);
//!
//! scheduler.advance_timers_by_time(250).unwrap();
//! assert!(fired.get());
//! ```

pub mod bridge;
pub mod config;
mod diagnostics;
pub mod error;
pub mod future;
pub mod host;
pub mod mocker;
pub mod scheduler;

pub use bridge::{IntRefBridge, OpaqueRef, OpaqueRefBridge, RefBridge, TimerId};
pub use config::{SchedulerConfig, StackTraceConfig, DEFAULT_MAX_LOOPS};
pub use error::{DrainKind, Error, Result};
pub use future::TimeoutFuture;
pub use host::{FrameCallback, HostGlobals, SimulatedHost, TimerApi, TimerCallback};
pub use mocker::{CallObserver, InvocationLog, NullObserver, PrimitiveInvocation};
pub use scheduler::FakeScheduler;
