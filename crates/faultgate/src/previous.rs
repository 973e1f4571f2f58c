//! Handlers that were installed before ours, and the table that remembers them.

use std::mem;
use std::ptr;
use std::sync::OnceLock;

use libc::c_int;
use libc::c_void;

use crate::signal::SignalKind;

pub type PlainHandler = extern "C" fn(c_int);
pub type InfoHandler = extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void);

/// The raw arguments the kernel handed to our handler, passed on unchanged
/// when chaining to a `SA_SIGINFO` handler.
#[derive(Debug, Clone, Copy)]
pub struct RawSignal {
    info: *mut libc::siginfo_t,
    context: *mut c_void,
}

impl RawSignal {
    pub fn new(info: *mut libc::siginfo_t, context: *mut c_void) -> Self {
        Self { info, context }
    }

    /// Arguments for a dispatch that did not come from the kernel.
    /// `SA_SIGINFO` handlers chained with this see null pointers.
    pub fn synthetic() -> Self {
        Self::new(ptr::null_mut(), ptr::null_mut())
    }
}

/// A disposition that was in place before setup.
///
/// Not comparable: function addresses are not a reliable identity.
#[derive(Debug, Clone, Copy)]
pub enum PreviousHandler {
    Default,
    Ignore,
    Plain(PlainHandler),
    Info(InfoHandler),
}

impl PreviousHandler {
    pub(crate) fn from_sigaction(action: &libc::sigaction) -> Self {
        match action.sa_sigaction {
            libc::SIG_DFL => PreviousHandler::Default,
            libc::SIG_IGN => PreviousHandler::Ignore,
            // SAFETY: any other value is a function address the previous
            // installer registered, with the signature implied by SA_SIGINFO.
            address if action.sa_flags & libc::SA_SIGINFO != 0 => {
                PreviousHandler::Info(unsafe { mem::transmute::<usize, InfoHandler>(address) })
            }
            address => {
                PreviousHandler::Plain(unsafe { mem::transmute::<usize, PlainHandler>(address) })
            }
        }
    }

    /// Whether there is a function to call. Default and ignore count as none.
    pub fn is_callable(&self) -> bool {
        matches!(self, PreviousHandler::Plain(_) | PreviousHandler::Info(_))
    }

    /// Calls the previous handler if there is one. Returns whether it ran.
    pub fn invoke(&self, kind: SignalKind, raw: &RawSignal) -> bool {
        match *self {
            PreviousHandler::Plain(handler) => {
                handler(kind.raw());
                true
            }
            PreviousHandler::Info(handler) => {
                handler(kind.raw(), raw.info, raw.context);
                true
            }
            PreviousHandler::Default | PreviousHandler::Ignore => false,
        }
    }
}

/// One write-once slot per recognized signal.
///
/// Slots are filled during setup right after the kernel reports the old
/// disposition. A signal that lands before its slot is filled sees an empty
/// slot and chains to nothing.
pub(crate) struct SlotTable {
    slots: [OnceLock<PreviousHandler>; SignalKind::COUNT],
}

impl SlotTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    /// Returns false if the slot was already filled.
    pub(crate) fn record(&self, kind: SignalKind, previous: PreviousHandler) -> bool {
        self.slots[kind.slot()].set(previous).is_ok()
    }

    pub(crate) fn get(&self, kind: SignalKind) -> Option<PreviousHandler> {
        self.slots[kind.slot()].get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    static PLAIN_CALLS: AtomicUsize = AtomicUsize::new(0);
    static PLAIN_LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

    extern "C" fn plain_handler(signo: c_int) {
        PLAIN_CALLS.fetch_add(1, Ordering::SeqCst);
        PLAIN_LAST_SIGNAL.store(signo, Ordering::SeqCst);
    }

    static INFO_CALLS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn info_handler(_signo: c_int, _info: *mut libc::siginfo_t, _ctx: *mut c_void) {
        INFO_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    fn action_with(handler: usize, flags: c_int) -> libc::sigaction {
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = handler;
        action.sa_flags = flags;
        action
    }

    #[test]
    fn test_default_and_ignore_are_not_callable() {
        let default = PreviousHandler::from_sigaction(&action_with(libc::SIG_DFL, 0));
        let ignore = PreviousHandler::from_sigaction(&action_with(libc::SIG_IGN, 0));

        assert!(matches!(default, PreviousHandler::Default));
        assert!(matches!(ignore, PreviousHandler::Ignore));
        assert!(!default.is_callable());
        assert!(!ignore.invoke(SignalKind::Hangup, &RawSignal::synthetic()));
    }

    #[test]
    fn test_plain_handler_is_invoked_with_signal_number() {
        let previous =
            PreviousHandler::from_sigaction(&action_with(plain_handler as PlainHandler as usize, 0));

        assert!(matches!(previous, PreviousHandler::Plain(_)));
        assert!(previous.invoke(SignalKind::Terminate, &RawSignal::synthetic()));
        assert_eq!(PLAIN_CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(PLAIN_LAST_SIGNAL.load(Ordering::SeqCst), libc::SIGTERM);
    }

    #[test]
    fn test_siginfo_flag_selects_info_handler() {
        let previous = PreviousHandler::from_sigaction(&action_with(
            info_handler as InfoHandler as usize,
            libc::SA_SIGINFO,
        ));

        assert!(matches!(previous, PreviousHandler::Info(_)));
        assert!(previous.invoke(SignalKind::SegmentationFault, &RawSignal::synthetic()));
        assert_eq!(INFO_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slot_is_write_once() {
        let table = SlotTable::new();
        assert!(table.get(SignalKind::Abort).is_none());

        assert!(table.record(SignalKind::Abort, PreviousHandler::Default));
        assert!(!table.record(SignalKind::Abort, PreviousHandler::Ignore));
        assert!(matches!(
            table.get(SignalKind::Abort),
            Some(PreviousHandler::Default)
        ));
        assert!(table.get(SignalKind::Hangup).is_none());
    }
}
