//! The fault-reporting collaborator and the sinks shipped with the crate.
//!
//! Everything a signal handler logs goes through [`FaultSink`]. [`FdSink`]
//! is usable from signal context: it formats into a stack buffer and writes
//! each record with one `write(2)` call, without allocating or locking.
//! [`TracingSink`] hands records to `tracing`, which may allocate and lock,
//! and is therefore only best-effort inside a handler.

use std::ffi::CString;
use std::fmt;
use std::fmt::Write as _;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::path::PathBuf;

use libc::c_void;
use tracing::Level;

use crate::error::FaultError;

const LINE_CAPACITY: usize = 1024;
const FAULT_LOG_MODE: u32 = 0o644;

pub trait FaultSink: Send + Sync {
    fn log(&self, level: Level, component: &str, message: fmt::Arguments<'_>);

    /// Reopens whatever the sink writes to.
    fn rotate_logs(&self);

    /// Pushes buffered output to its destination.
    fn flush_all(&self);
}

/// Fixed-capacity formatting target. Output past the capacity is dropped.
pub(crate) struct LineBuffer<const N: usize> {
    bytes: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> LineBuffer<N> {
    pub(crate) fn new() -> Self {
        Self {
            bytes: [0; N],
            len: 0,
            truncated: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// The buffered text terminated by a newline, overwriting the last byte
    /// when full.
    pub(crate) fn as_line(&mut self) -> &[u8] {
        if N == 0 {
            return &[];
        }
        if self.len == N {
            self.bytes[N - 1] = b'\n';
        } else {
            self.bytes[self.len] = b'\n';
            self.len += 1;
        }
        &self.bytes[..self.len]
    }
}

impl<const N: usize> fmt::Write for LineBuffer<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = N - self.len;
        let take = s.len().min(room);
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        if take < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}

enum SinkTarget {
    Stderr,
    File { file: File, path: CString },
}

/// Unbuffered sink writing straight to a file descriptor.
pub struct FdSink {
    target: SinkTarget,
}

impl FdSink {
    pub fn stderr() -> Self {
        Self {
            target: SinkTarget::Stderr,
        }
    }

    /// Appends to `path`, creating it if needed. [`rotate_logs`](FaultSink::rotate_logs)
    /// reopens the same path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FaultError> {
        let path = path.as_ref();
        let fault_log_error = |source: io::Error| FaultError::FaultLog {
            path: path.to_path_buf(),
            source,
        };
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
            fault_log_error(io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(FAULT_LOG_MODE)
            .open(path)
            .map_err(fault_log_error)?;

        Ok(Self {
            target: SinkTarget::File { file, path: c_path },
        })
    }

    pub fn path(&self) -> Option<PathBuf> {
        match &self.target {
            SinkTarget::Stderr => None,
            SinkTarget::File { path, .. } => Some(PathBuf::from(
                std::ffi::OsStr::from_bytes(path.as_bytes()),
            )),
        }
    }

    fn fd(&self) -> RawFd {
        match &self.target {
            SinkTarget::Stderr => libc::STDERR_FILENO,
            SinkTarget::File { file, .. } => file.as_raw_fd(),
        }
    }

    fn write_raw(&self, mut bytes: &[u8]) {
        let fd = self.fd();
        while !bytes.is_empty() {
            // SAFETY: write(2) with a pointer and length taken from a live slice.
            let written =
                unsafe { libc::write(fd, bytes.as_ptr() as *const c_void, bytes.len()) };
            if written < 0 {
                if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return;
            }
            if written == 0 {
                return;
            }
            bytes = &bytes[written as usize..];
        }
    }
}

fn wall_clock() -> (i64, i64) {
    // SAFETY: an all-zero timespec is valid; clock_gettime only writes into it.
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return (0, 0);
    }
    (now.tv_sec as i64, now.tv_nsec as i64 / 1_000_000)
}

impl FaultSink for FdSink {
    fn log(&self, level: Level, component: &str, message: fmt::Arguments<'_>) {
        let mut line = LineBuffer::<LINE_CAPACITY>::new();
        let (secs, millis) = wall_clock();
        let _ = write!(
            line,
            "[{}.{:03}] {} ({}): {}",
            secs,
            millis,
            level.as_str(),
            component,
            message
        );
        self.write_raw(line.as_line());
    }

    fn rotate_logs(&self) {
        let SinkTarget::File { file, path } = &self.target else {
            return;
        };
        // SAFETY: open/dup2/close are async-signal-safe; path is NUL-terminated.
        unsafe {
            let fresh = libc::open(
                path.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND | libc::O_CLOEXEC,
                FAULT_LOG_MODE,
            );
            if fresh < 0 {
                self.log(
                    Level::WARN,
                    "sink",
                    format_args!("unable to reopen fault log, keeping the old file"),
                );
                return;
            }
            libc::dup2(fresh, file.as_raw_fd());
            libc::close(fresh);
        }
    }

    fn flush_all(&self) {
        if let SinkTarget::File { file, .. } = &self.target {
            // SAFETY: fsync on an owned descriptor.
            unsafe {
                libc::fsync(file.as_raw_fd());
            }
        }
    }
}

/// Forwards fault records to the process's `tracing` subscriber.
///
/// Not async-signal-safe: the subscriber may allocate or take locks held by
/// the interrupted thread. Prefer [`FdSink`] for crash reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FaultSink for TracingSink {
    fn log(&self, level: Level, component: &str, message: fmt::Arguments<'_>) {
        match level {
            Level::ERROR => tracing::error!(component, "{}", message),
            Level::WARN => tracing::warn!(component, "{}", message),
            Level::INFO => tracing::info!(component, "{}", message),
            Level::DEBUG => tracing::debug!(component, "{}", message),
            _ => tracing::trace!(component, "{}", message),
        }
    }

    /// The subscriber owns its writers, so rotation is left to them (for
    /// example a `tracing-appender` rolling file). The request is recorded.
    fn rotate_logs(&self) {
        tracing::info!(component = "sink", "log rotation requested");
    }

    fn flush_all(&self) {}
}
