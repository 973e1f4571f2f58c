//! Crash diagnostics: a bounded call-stack snapshot reported frame by frame.
//!
//! Frame addresses are collected into a fixed array, so capture itself does
//! not allocate. Symbol resolution does allocate and may take locks inside
//! the unwinder; it runs anyway because a symbolized trace is the point of
//! the report. If the interrupted thread held one of those locks the report
//! can stall, which is the accepted risk. Any panic during capture or
//! resolution is caught and degrades to less output.

use std::panic;
use std::panic::AssertUnwindSafe;
use std::ptr;

use libc::c_void;
use tracing::Level;

use crate::context::SignalContext;
use crate::context::COMPONENT;
use crate::sink::FaultSink;

/// Hard cap on reported frames, bounding time spent in signal context.
pub const MAX_BACKTRACE_DEPTH: usize = 50;

/// How far from the top of the walk the reporting machinery itself may
/// reach: the unwinder, `catch_unwind`, this module and the trampoline.
const OWN_FRAME_WINDOW: usize = 24;

#[derive(Clone, Copy)]
struct RawFrame {
    ip: *mut c_void,
    function: usize,
}

impl RawFrame {
    const EMPTY: RawFrame = RawFrame {
        ip: ptr::null_mut(),
        function: 0,
    };
}

/// Captures up to the configured number of frames, innermost first, logs
/// one line per frame and flushes the sink. Returns the number of frames
/// reported.
///
/// Frames belonging to the reporting path are dropped, so frame 0 is the
/// signal trampoline or, when called directly, the caller.
pub fn capture_and_report(ctx: &SignalContext) -> usize {
    let depth = ctx.config.backtrace_depth.clamp(1, MAX_BACKTRACE_DEPTH);
    let mut frames = [RawFrame::EMPTY; MAX_BACKTRACE_DEPTH + OWN_FRAME_WINDOW];

    let captured = panic::catch_unwind(AssertUnwindSafe(|| capture(&mut frames))).unwrap_or(0);
    let first = first_foreign_frame(&frames[..captured]);
    let reported = (captured - first).min(depth);

    for (index, frame) in frames[first..first + reported].iter().enumerate() {
        report_frame(ctx.sink(), index, frame.ip);
    }

    ctx.sink.flush_all();
    reported
}

fn capture(frames: &mut [RawFrame]) -> usize {
    let mut count = 0;
    // SAFETY: the unsynchronized variant skips the global lock, which may
    // already be held by the interrupted thread.
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            if count >= frames.len() {
                return false;
            }
            frames[count] = RawFrame {
                ip: frame.ip(),
                function: frame.symbol_address() as usize,
            };
            count += 1;
            true
        });
    }
    count
}

/// Index just past the outermost reporting-path function near the top of
/// the walk, or 0 when none is recognized.
fn first_foreign_frame(frames: &[RawFrame]) -> usize {
    let own = [
        capture_and_report as usize,
        crate::dispatch::handle as usize,
        crate::registry::on_signal as usize,
    ];
    let window = frames.len().min(OWN_FRAME_WINDOW);
    frames[..window]
        .iter()
        .rposition(|frame| frame.function != 0 && own.contains(&frame.function))
        .map_or(0, |index| index + 1)
}

fn report_frame(sink: &dyn FaultSink, index: usize, address: *mut c_void) {
    let mut reported = false;
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: see `capture`.
        unsafe {
            backtrace::resolve_unsynchronized(address, |symbol| {
                if reported {
                    return;
                }
                if let Some(name) = symbol.name() {
                    sink.log(
                        Level::WARN,
                        COMPONENT,
                        format_args!("stacktrace: frame {}: {} [{:p}]", index, name, address),
                    );
                    reported = true;
                }
            });
        }
    }));

    if !reported {
        sink.log(
            Level::WARN,
            COMPONENT,
            format_args!("stacktrace: frame {}: {:p}", index, address),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FaultConfig;
    use crate::sink::mock::RecordingSink;

    fn context_with_depth(sink: &RecordingSink, depth: usize) -> SignalContext {
        SignalContext::builder()
            .with_sink(sink.clone())
            .with_config(FaultConfig::default().with_backtrace_depth(depth))
            .build()
            .unwrap()
    }

    #[test]
    fn test_reports_one_line_per_frame_in_order() {
        let sink = RecordingSink::new();
        let ctx = context_with_depth(&sink, 8);

        let reported = capture_and_report(&ctx);

        assert!(reported > 0);
        assert!(reported <= 8);
        let messages = sink.messages();
        assert_eq!(messages.len(), reported);
        for (index, message) in messages.iter().enumerate() {
            assert!(
                message.starts_with(&format!("stacktrace: frame {}: ", index)),
                "unexpected line {:?}",
                message
            );
        }
    }

    #[test]
    fn test_depth_caps_reported_frames() {
        let sink = RecordingSink::new();
        let ctx = context_with_depth(&sink, 1);

        assert_eq!(capture_and_report(&ctx), 1);
        assert_eq!(sink.messages().len(), 1);
    }

    #[test]
    fn test_flushes_after_reporting() {
        let sink = RecordingSink::new();
        let ctx = context_with_depth(&sink, 4);

        capture_and_report(&ctx);
        assert_eq!(sink.flushes(), 1);
    }

    #[test]
    fn test_reporting_path_frames_are_skipped() {
        let sink = RecordingSink::new();
        let ctx = context_with_depth(&sink, 4);

        capture_and_report(&ctx);

        let messages = sink.messages();
        assert!(!messages.is_empty());
        for message in &messages {
            assert!(!message.contains("backtrace::"), "unwinder frame {:?}", message);
            assert!(
                !message.contains("diagnostics::capture"),
                "own frame {:?}",
                message
            );
        }
    }

    #[test]
    fn test_walk_without_own_frames_starts_at_top() {
        let frames = [
            RawFrame {
                ip: 0x10 as *mut c_void,
                function: 0x10,
            },
            RawFrame::EMPTY,
        ];
        assert_eq!(first_foreign_frame(&frames), 0);
    }

    #[test]
    fn test_walk_resumes_after_outermost_own_frame() {
        let frame = |function: usize| RawFrame {
            ip: function as *mut c_void,
            function,
        };
        let frames = [
            frame(0x10),
            frame(capture_and_report as usize),
            frame(crate::dispatch::handle as usize),
            frame(0x20),
        ];
        assert_eq!(first_foreign_frame(&frames), 3);
    }

    #[test]
    fn test_unresolvable_address_falls_back_to_raw_pointer() {
        let sink = RecordingSink::new();
        report_frame(&sink, 7, ptr::null_mut());

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].starts_with("stacktrace: frame 7: 0x"));
    }
}
