//! Fixture wiring for the integration suites.

use std::rc::Rc;

use fake_timers::{
    CallObserver, FakeScheduler, IntRefBridge, InvocationLog, SchedulerConfig, SimulatedHost,
    StackTraceConfig,
};

/// Host + scheduler wired with an invocation log.
pub struct Fixture {
    pub host: Rc<SimulatedHost>,
    pub scheduler: FakeScheduler<SimulatedHost>,
    pub log: Rc<InvocationLog>,
}

pub fn fixture() -> Fixture {
    fixture_with_config(SchedulerConfig::default())
}

pub fn fixture_with_config(config: SchedulerConfig) -> Fixture {
    super::init_logging();
    let host = Rc::new(SimulatedHost::new());
    let log = Rc::new(InvocationLog::new());
    let scheduler = FakeScheduler::new(
        Rc::clone(&host),
        Rc::clone(&log) as Rc<dyn CallObserver>,
        Rc::new(IntRefBridge),
        config,
    );
    Fixture {
        host,
        scheduler,
        log,
    }
}

/// Tight loop bound with backtrace capture off, for recursion-guard tests.
#[must_use]
pub fn bounded_config(max_loops: u32) -> SchedulerConfig {
    SchedulerConfig {
        max_loops,
        stack_trace: StackTraceConfig {
            capture: false,
            max_frames: 0,
        },
    }
}
