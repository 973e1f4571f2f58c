//! The set of signals this crate takes over and the policy class of each.

use std::fmt;

use libc::c_int;
use signal_hook::consts::SIGABRT;
use signal_hook::consts::SIGBUS;
use signal_hook::consts::SIGFPE;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGPIPE;
use signal_hook::consts::SIGSEGV;
use signal_hook::consts::SIGTERM;

/// A recognized signal. The discriminant doubles as the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    SegmentationFault,
    Abort,
    FloatingPoint,
    BusError,
    Hangup,
    BrokenPipe,
}

/// How a signal is treated once it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    /// Orderly teardown if startup has completed, immediate exit otherwise.
    Graceful,
    /// Unrecoverable fault: diagnose, then terminate or defer to the chain.
    Fatal,
    /// Log rotation; the process keeps running.
    Operational,
    /// Ignored so that writes report an error instead of killing the process.
    Suppressed,
}

impl SignalKind {
    pub const COUNT: usize = 8;

    pub const ALL: [SignalKind; Self::COUNT] = [
        SignalKind::Interrupt,
        SignalKind::Terminate,
        SignalKind::SegmentationFault,
        SignalKind::Abort,
        SignalKind::FloatingPoint,
        SignalKind::BusError,
        SignalKind::Hangup,
        SignalKind::BrokenPipe,
    ];

    /// Signals that get a real handler. SIGPIPE is set to ignore instead.
    pub const HANDLED: [SignalKind; 7] = [
        SignalKind::Interrupt,
        SignalKind::Terminate,
        SignalKind::SegmentationFault,
        SignalKind::Abort,
        SignalKind::FloatingPoint,
        SignalKind::BusError,
        SignalKind::Hangup,
    ];

    pub fn raw(self) -> c_int {
        match self {
            SignalKind::Interrupt => SIGINT,
            SignalKind::Terminate => SIGTERM,
            SignalKind::SegmentationFault => SIGSEGV,
            SignalKind::Abort => SIGABRT,
            SignalKind::FloatingPoint => SIGFPE,
            SignalKind::BusError => SIGBUS,
            SignalKind::Hangup => SIGHUP,
            SignalKind::BrokenPipe => SIGPIPE,
        }
    }

    pub fn from_raw(signo: c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.raw() == signo)
    }

    pub fn name(self) -> &'static str {
        match self {
            SignalKind::Interrupt => "SIGINT",
            SignalKind::Terminate => "SIGTERM",
            SignalKind::SegmentationFault => "SIGSEGV",
            SignalKind::Abort => "SIGABRT",
            SignalKind::FloatingPoint => "SIGFPE",
            SignalKind::BusError => "SIGBUS",
            SignalKind::Hangup => "SIGHUP",
            SignalKind::BrokenPipe => "SIGPIPE",
        }
    }

    pub fn class(self) -> SignalClass {
        match self {
            SignalKind::Interrupt | SignalKind::Terminate => SignalClass::Graceful,
            SignalKind::SegmentationFault
            | SignalKind::Abort
            | SignalKind::FloatingPoint
            | SignalKind::BusError => SignalClass::Fatal,
            SignalKind::Hangup => SignalClass::Operational,
            SignalKind::BrokenPipe => SignalClass::Suppressed,
        }
    }

    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
