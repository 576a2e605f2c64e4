//! Backtrace capture for misuse diagnostics.
//!
//! Drain operations warn (non-fatally) when the host's primitives are not
//! the scheduler's fakes. The warning carries a rendered backtrace so the
//! offending call site can be found; [`StackTraceConfig`] bounds how much of
//! it is shown.

use std::backtrace::Backtrace;

use crate::config::StackTraceConfig;

/// Capture the current backtrace rendered per `config`.
///
/// Returns an empty string when capture is disabled.
pub(crate) fn capture_stack(config: &StackTraceConfig) -> String {
    if !config.capture {
        return String::new();
    }
    let backtrace = Backtrace::force_capture();
    format_stack(&backtrace.to_string(), config.max_frames)
}

/// Keep at most `max_frames` frames of a rendered backtrace.
///
/// A frame header is a line of the form `  N: symbol`; its indented
/// `at file:line` continuation lines travel with it.
fn format_stack(rendered: &str, max_frames: usize) -> String {
    let mut out = String::new();
    let mut frames = 0usize;
    for line in rendered.lines() {
        if is_frame_header(line) {
            frames += 1;
            if frames > max_frames {
                break;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn is_frame_header(line: &str) -> bool {
    let head = line.trim_start();
    let Some((index, _)) = head.split_once(':') else {
        return false;
    };
    !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "   0: alpha::one\n             at src/a.rs:10:5\n   1: beta::two\n             at src/b.rs:20:9\n   2: gamma::three\n             at src/c.rs:30:1\n";

    #[test]
    fn truncates_to_max_frames() {
        let formatted = format_stack(RENDERED, 2);
        assert!(formatted.contains("alpha::one"));
        assert!(formatted.contains("beta::two"));
        assert!(!formatted.contains("gamma::three"));
        assert!(formatted.contains("src/b.rs:20:9"));
    }

    #[test]
    fn keeps_everything_when_under_limit() {
        let formatted = format_stack(RENDERED, 10);
        assert!(formatted.contains("gamma::three"));
    }

    #[test]
    fn disabled_capture_is_empty() {
        let config = StackTraceConfig {
            capture: false,
            max_frames: 10,
        };
        assert_eq!(capture_stack(&config), "");
    }

    #[test]
    fn frame_header_detection() {
        assert!(is_frame_header("   0: alpha::one"));
        assert!(is_frame_header("12: beta"));
        assert!(!is_frame_header("             at src/a.rs:10:5"));
        assert!(!is_frame_header("plain text"));
    }
}
