//! Per-signal policy. [`handle`] performs everything a signal asks for and
//! returns the terminal action as an [`Outcome`] for the caller to carry out,
//! so the policy can be exercised without raising real signals.

use tracing::Level;

use crate::context::SignalContext;
use crate::context::COMPONENT;
use crate::diagnostics;
use crate::previous::PreviousHandler;
use crate::previous::RawSignal;
use crate::shutdown::Release;
use crate::signal::SignalKind;

/// Exit status after a segmentation fault, `_exit(-1)` as seen by a parent.
pub const SEGV_EXIT_STATUS: i32 = 255;

/// Exit status after a bus error, shell-style `128 + SIGBUS`.
pub fn bus_exit_status() -> i32 {
    128 + SignalKind::BusError.raw()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Return from the handler.
    Resume,
    /// Halt the process now with this status, running no teardown.
    Exit(i32),
    /// Restore the default disposition and re-deliver the signal.
    DefaultAction,
}

impl Outcome {
    /// Carries out the outcome from inside the handler.
    pub(crate) fn execute(self, kind: SignalKind) {
        match self {
            Outcome::Resume => {}
            Outcome::Exit(status) => signal_hook::low_level::exit(status),
            Outcome::DefaultAction => {
                if signal_hook::low_level::emulate_default_handler(kind.raw()).is_err() {
                    signal_hook::low_level::exit(128 + kind.raw());
                }
            }
        }
    }
}

pub fn handle(ctx: &SignalContext, kind: SignalKind, raw: &RawSignal) -> Outcome {
    match kind {
        SignalKind::Interrupt | SignalKind::Terminate => graceful(ctx, kind, raw),
        SignalKind::SegmentationFault => {
            announce_fatal(ctx, kind);
            diagnostics::capture_and_report(ctx);
            ctx.replication.forward(kind);
            chain(ctx, kind, raw);
            Outcome::Exit(SEGV_EXIT_STATUS)
        }
        SignalKind::Abort | SignalKind::FloatingPoint => {
            announce_fatal(ctx, kind);
            ctx.replication.forward(kind);
            diagnostics::capture_and_report(ctx);
            match ctx.previous_handler(kind) {
                Some(PreviousHandler::Default) => Outcome::DefaultAction,
                _ => {
                    chain(ctx, kind, raw);
                    Outcome::Resume
                }
            }
        }
        SignalKind::BusError => {
            announce_fatal(ctx, kind);
            ctx.replication.forward(kind);
            diagnostics::capture_and_report(ctx);
            chain(ctx, kind, raw);
            ctx.sink.flush_all();
            Outcome::Exit(bus_exit_status())
        }
        SignalKind::Hangup => {
            chain(ctx, kind, raw);
            ctx.sink.log(
                Level::INFO,
                COMPONENT,
                format_args!("{} received, rolling log", kind),
            );
            ctx.sink.rotate_logs();
            Outcome::Resume
        }
        SignalKind::BrokenPipe => Outcome::Resume,
    }
}

fn graceful(ctx: &SignalContext, kind: SignalKind, raw: &RawSignal) -> Outcome {
    ctx.sink.log(
        Level::INFO,
        COMPONENT,
        format_args!("{} received, shutting down", kind),
    );

    ctx.replication.stop();
    ctx.replication.forward(kind);
    chain(ctx, kind, raw);

    match ctx.gate.release() {
        Release::Released => Outcome::Resume,
        Release::AlreadyReleased => {
            ctx.sink.log(
                Level::INFO,
                COMPONENT,
                format_args!("shutdown already in progress, ignoring {}", kind),
            );
            Outcome::Resume
        }
        Release::TooEarly => {
            ctx.sink.log(
                Level::WARN,
                COMPONENT,
                format_args!("startup was not complete, exiting immediately"),
            );
            ctx.sink.flush_all();
            Outcome::Exit(0)
        }
    }
}

fn announce_fatal(ctx: &SignalContext, kind: SignalKind) {
    ctx.sink.log(
        Level::WARN,
        COMPONENT,
        format_args!(
            "{} received, aborting {} build {}",
            kind, ctx.build.build_type, ctx.build.build_id
        ),
    );
}

/// Calls the recorded previous handler. An empty slot, default or ignore is a no-op.
fn chain(ctx: &SignalContext, kind: SignalKind, raw: &RawSignal) -> bool {
    ctx.previous_handler(kind)
        .is_some_and(|previous| previous.invoke(kind, raw))
}
