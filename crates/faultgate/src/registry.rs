//! Installs the process-wide handlers and owns the context they read.

use std::io;
use std::mem;
use std::ptr;
use std::sync::OnceLock;

use libc::c_int;
use libc::c_void;
use tracing::debug;
use tracing::info;
use tracing::Level;

use crate::context::SignalContext;
use crate::context::COMPONENT;
use crate::dispatch;
use crate::error::FaultError;
use crate::previous::PreviousHandler;
use crate::previous::RawSignal;
use crate::signal::SignalKind;

static CONTEXT: OnceLock<SignalContext> = OnceLock::new();

/// Installs a handler for every recognized signal and sets SIGPIPE to ignore.
///
/// Call once during process initialization. The context is moved into
/// process-wide storage and a reference to it is returned; the main thread
/// parks on its gate and the startup sequence marks it complete.
pub fn install_all(context: SignalContext) -> Result<&'static SignalContext, FaultError> {
    if CONTEXT.set(context).is_err() {
        return Err(FaultError::AlreadyInstalled);
    }
    let ctx = CONTEXT.get().ok_or(FaultError::AlreadyInstalled)?;

    for kind in SignalKind::HANDLED {
        let previous = install(kind).map_err(|source| FaultError::Install {
            signal: kind.name(),
            source,
        })?;
        ctx.record_previous(kind, previous);
        debug!(signal = kind.name(), previous = ?previous, "Installed signal handler");
    }

    if let Err(err) = ignore_broken_pipe() {
        ctx.sink.log(
            Level::WARN,
            COMPONENT,
            format_args!("Not able to block the SIGPIPE signal: {}", err),
        );
    }

    info!(
        signals = SignalKind::HANDLED.len(),
        build_type = ctx.build.build_type,
        build_id = ctx.build.build_id,
        "Signal handlers installed"
    );
    Ok(ctx)
}

/// The installed context, once [`install_all`] has run.
pub fn installed() -> Option<&'static SignalContext> {
    CONTEXT.get()
}

/// Entry point for the startup sequence. Returns false if handlers are not
/// installed or startup was already marked complete.
pub fn mark_startup_complete() -> bool {
    CONTEXT.get().is_some_and(|ctx| ctx.mark_startup_complete())
}

/// Handlers run on the interrupted thread's own stack. The only alternate
/// stack in a Rust process is the small one std keeps for its overflow
/// message, and symbol resolution does not fit in it.
const HANDLER_FLAGS: c_int = libc::SA_SIGINFO | libc::SA_RESTART;

/// Replaces the disposition of `kind` with our handler and returns the old one.
fn install(kind: SignalKind) -> io::Result<PreviousHandler> {
    // SAFETY: zeroed sigaction is a valid starting value; both structs live
    // for the duration of the call.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_signal as *const () as libc::sighandler_t;
        action.sa_flags = HANDLER_FLAGS;
        libc::sigemptyset(&mut action.sa_mask);

        let mut previous: libc::sigaction = mem::zeroed();
        if libc::sigaction(kind.raw(), &action, &mut previous) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(PreviousHandler::from_sigaction(&previous))
    }
}

/// Writes to a closed pipe or socket then fail with EPIPE instead of
/// killing the process.
fn ignore_broken_pipe() -> io::Result<()> {
    let signo = SignalKind::BrokenPipe.raw();
    // SAFETY: as in `install`.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = libc::SIG_IGN;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaddset(&mut action.sa_mask, signo);

        if libc::sigaction(signo, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub(crate) extern "C" fn on_signal(signo: c_int, info: *mut libc::siginfo_t, context: *mut c_void) {
    let Some(ctx) = CONTEXT.get() else {
        return;
    };
    let Some(kind) = SignalKind::from_raw(signo) else {
        return;
    };
    let raw = RawSignal::new(info, context);
    dispatch::handle(ctx, kind, &raw).execute(kind);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Installing would take over signals for the whole test binary, so the
    // end-to-end paths are covered by tests/host_process.rs instead.

    #[test]
    fn test_nothing_installed_in_test_process() {
        assert!(installed().is_none());
        assert!(!mark_startup_complete());
    }

    #[test]
    fn test_handlers_stay_on_thread_stack() {
        assert_eq!(HANDLER_FLAGS & libc::SA_ONSTACK, 0);
        assert_ne!(HANDLER_FLAGS & libc::SA_SIGINFO, 0);
        assert_ne!(HANDLER_FLAGS & libc::SA_RESTART, 0);
    }

    #[test]
    fn test_trampoline_ignores_signals_before_install() {
        on_signal(libc::SIGHUP, ptr::null_mut(), ptr::null_mut());
        assert!(installed().is_none());
    }
}
