//! The shutdown gate the main thread parks on until a graceful signal lets
//! it proceed to teardown.
//!
//! The gate tracks the coordinator phase in one atomic:
//!
//! ```text
//! Initializing --mark_running--> Running --release--> ShuttingDown --finish--> Terminated
//! ```
//!
//! Startup is complete exactly when the phase has left `Initializing`, so the
//! startup check and the release are the same compare-and-swap. Release
//! wakes the waiter by writing one byte to a socket pair, which is safe to do
//! from a signal handler.

use std::io;
use std::io::Read;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::time::Duration;

use libc::c_void;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Initializing = 0,
    Running = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Initializing,
            1 => Phase::Running,
            2 => Phase::ShuttingDown,
            _ => Phase::Terminated,
        }
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The gate opened and the waiter has been woken.
    Released,
    /// Startup has not completed; the gate was not touched.
    TooEarly,
    /// A previous signal already opened the gate.
    AlreadyReleased,
}

#[derive(Debug)]
pub struct ShutdownGate {
    phase: AtomicU8,
    waiter: UnixStream,
    notifier: UnixStream,
}

impl ShutdownGate {
    /// Creates a gate that is held from the start, in `Initializing`.
    pub fn new() -> io::Result<Self> {
        let (waiter, notifier) = UnixStream::pair()?;
        Ok(Self {
            phase: AtomicU8::new(Phase::Initializing as u8),
            waiter,
            notifier,
        })
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_startup_complete(&self) -> bool {
        self.phase() != Phase::Initializing
    }

    /// Sets the startup-complete flag. Returns false if it was already set.
    pub fn mark_running(&self) -> bool {
        self.transition(Phase::Initializing, Phase::Running).is_ok()
    }

    /// Opens the gate once. Safe to call from a signal handler.
    pub fn release(&self) -> Release {
        match self.transition(Phase::Running, Phase::ShuttingDown) {
            Ok(()) => {
                self.wake();
                Release::Released
            }
            Err(Phase::Initializing) => Release::TooEarly,
            Err(_) => Release::AlreadyReleased,
        }
    }

    /// Blocks until the gate has been released.
    pub fn wait(&self) -> io::Result<()> {
        let mut token = [0u8; 1];
        loop {
            match (&self.waiter).read(&mut token) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "shutdown gate notifier closed",
                    ));
                }
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    /// Returns whether a release was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.waiter.set_read_timeout(Some(timeout))?;
        let result = self.wait();
        self.waiter.set_read_timeout(None)?;
        match result {
            Ok(()) => Ok(true),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Marks teardown as done. Only meaningful after a release.
    pub fn finish(&self) -> bool {
        self.transition(Phase::ShuttingDown, Phase::Terminated).is_ok()
    }

    fn transition(&self, from: Phase, to: Phase) -> Result<(), Phase> {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(Phase::from_u8)
    }

    fn wake(&self) {
        let token = [1u8; 1];
        loop {
            // SAFETY: write(2) on an owned descriptor with a valid one-byte buffer.
            let written = unsafe {
                libc::write(
                    self.notifier.as_raw_fd(),
                    token.as_ptr() as *const c_void,
                    token.len(),
                )
            };
            if written >= 0 || io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
                return;
            }
        }
    }
}
