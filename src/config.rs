//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Default bound applied to every drain loop.
pub const DEFAULT_MAX_LOOPS: u32 = 100_000;

const fn default_max_loops() -> u32 {
    DEFAULT_MAX_LOOPS
}

const fn default_capture() -> bool {
    true
}

const fn default_max_frames() -> usize {
    10
}

/// Tunables for [`FakeScheduler`](crate::scheduler::FakeScheduler).
///
/// Unset fields fall back to the documented defaults, so embedders can load
/// this from a partial config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Iteration bound applied to every drain loop.
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,

    /// Backtrace formatting for the drained-without-install warning.
    #[serde(default)]
    pub stack_trace: StackTraceConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_loops: DEFAULT_MAX_LOOPS,
            stack_trace: StackTraceConfig::default(),
        }
    }
}

/// Controls the backtrace attached to diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackTraceConfig {
    /// Capture and attach a backtrace.
    #[serde(default = "default_capture")]
    pub capture: bool,

    /// Maximum number of frames rendered.
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

impl Default for StackTraceConfig {
    fn default() -> Self {
        Self {
            capture: true,
            max_frames: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_loops, 100_000);
        assert!(config.stack_trace.capture);
        assert_eq!(config.stack_trace.max_frames, 10);
    }

    #[test]
    fn empty_document_deserializes_to_defaults() {
        let config: SchedulerConfig = serde_json::from_str("{}").expect("parse");
        assert_eq!(config.max_loops, DEFAULT_MAX_LOOPS);
        assert_eq!(config.stack_trace.max_frames, 10);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"max_loops": 50}"#).expect("parse");
        assert_eq!(config.max_loops, 50);
        assert!(config.stack_trace.capture);
    }
}
