//! The replication/streaming collaborator told about shutdowns and crashes.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::signal::SignalKind;

/// Both methods run inside a signal handler and must not block.
pub trait Replication: Send + Sync {
    /// Asks replication to stop before the process tears down.
    fn stop(&self);

    /// Lets replication react to a fatal or graceful signal on its own.
    fn forward(&self, signal: SignalKind);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReplication;

impl Replication for NoopReplication {
    fn stop(&self) {}

    fn forward(&self, _signal: SignalKind) {}
}

#[derive(Debug, Default)]
struct Flags {
    stopped: AtomicBool,
    stop_requests: AtomicUsize,
    forwarded: AtomicUsize,
    last_forwarded: AtomicI32,
}

/// Lock-free replication handle. A replication thread keeps a clone and
/// polls [`is_stopped`](Self::is_stopped); the signal side only touches atomics.
#[derive(Debug, Default, Clone)]
pub struct ReplicationFlags {
    flags: Arc<Flags>,
}

impl ReplicationFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.stopped.load(Ordering::SeqCst)
    }

    pub fn stop_requests(&self) -> usize {
        self.flags.stop_requests.load(Ordering::SeqCst)
    }

    pub fn forwarded(&self) -> usize {
        self.flags.forwarded.load(Ordering::SeqCst)
    }

    pub fn last_forwarded(&self) -> Option<SignalKind> {
        SignalKind::from_raw(self.flags.last_forwarded.load(Ordering::SeqCst))
    }
}

impl Replication for ReplicationFlags {
    fn stop(&self) {
        self.flags.stop_requests.fetch_add(1, Ordering::SeqCst);
        self.flags.stopped.store(true, Ordering::SeqCst);
    }

    fn forward(&self, signal: SignalKind) {
        self.flags.last_forwarded.store(signal.raw(), Ordering::SeqCst);
        self.flags.forwarded.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_start_clear() {
        let flags = ReplicationFlags::new();
        assert!(!flags.is_stopped());
        assert_eq!(flags.stop_requests(), 0);
        assert_eq!(flags.last_forwarded(), None);
    }

    #[test]
    fn test_clones_share_state() {
        let flags = ReplicationFlags::new();
        let signal_side = flags.clone();

        signal_side.stop();
        signal_side.forward(SignalKind::Terminate);

        assert!(flags.is_stopped());
        assert_eq!(flags.stop_requests(), 1);
        assert_eq!(flags.forwarded(), 1);
        assert_eq!(flags.last_forwarded(), Some(SignalKind::Terminate));
    }
}
