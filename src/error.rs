//! Crate-wide error and result types.
//!
//! The taxonomy is small on purpose: drain loops that hit their iteration
//! bound, internal timer-table corruption, and timeout futures whose backing
//! timer went away. Callback panics are not represented here; they unwind
//! through the drain call with queue state already consistent.

use std::fmt;

use thiserror::Error;

use crate::bridge::TimerId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Which drain loop hit its iteration bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainKind {
    /// The next-tick queue.
    Ticks,
    /// The immediate queue.
    Immediates,
    /// The timeout/interval table.
    Timers,
}

impl DrainKind {
    /// Lowercase name used in messages and log events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticks => "ticks",
            Self::Immediates => "immediates",
            Self::Timers => "timers",
        }
    }
}

impl fmt::Display for DrainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by scheduler operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A drain loop reached `max_loops` without exhausting its queue.
    ///
    /// Scheduler state is left intact: the remaining work stays queued and
    /// further drains may be attempted once the runaway scheduling is fixed.
    #[error(
        "ran {max_loops} {kind} and there are still more; \
         assuming an infinite scheduling loop and bailing out"
    )]
    LoopLimitExceeded {
        /// The drain that gave up.
        kind: DrainKind,
        /// The configured iteration bound.
        max_loops: u32,
    },

    /// A stored timer was neither a valid timeout nor a valid interval.
    ///
    /// This indicates corruption of the timer table and never fires in a
    /// correct build.
    #[error("{id} is neither a valid timeout nor a valid interval; timer state is corrupt")]
    UnexpectedTimerKind {
        /// The offending entry.
        id: TimerId,
    },

    /// The timer backing a [`TimeoutFuture`](crate::future::TimeoutFuture)
    /// was cleared, reset, or disposed before it fired.
    #[error("timeout future dropped before its timer fired")]
    TimeoutDropped,
}

impl Error {
    pub(crate) const fn loop_limit(kind: DrainKind, max_loops: u32) -> Self {
        Self::LoopLimitExceeded { kind, max_loops }
    }

    pub(crate) const fn unexpected_timer_kind(id: TimerId) -> Self {
        Self::UnexpectedTimerKind { id }
    }
}
