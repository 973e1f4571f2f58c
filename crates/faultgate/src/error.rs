//! Setup errors. Nothing that runs inside a signal handler returns these.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaultError {
    #[error("Signal handlers are already installed in this process")]
    AlreadyInstalled,
    #[error("Failed to install handler for {signal}: {source}")]
    Install {
        signal: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create shutdown gate: {0}")]
    Gate(#[source] io::Error),
    #[error("Failed to open fault log {}: {source}", path.display())]
    FaultLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FaultError {
    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> String {
        match self {
            FaultError::AlreadyInstalled => {
                "Call install_all once during process initialization and keep the returned context."
                    .to_string()
            }
            FaultError::Install { signal, .. } => format!(
                "The OS refused a disposition for {}. Check that no sandbox or seccomp policy blocks sigaction.",
                signal
            ),
            FaultError::Gate(_) => {
                "Creating the shutdown gate needs a socket pair; check the open file limit (ulimit -n)."
                    .to_string()
            }
            FaultError::FaultLog { path, .. } => format!(
                "Make sure {} is writable or unset FAULTGATE_FAULT_LOG to log to stderr.",
                path.display()
            ),
        }
    }

    /// Returns whether this error is potentially transient and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            FaultError::Gate(source) | FaultError::FaultLog { source, .. } => matches!(
                source.raw_os_error(),
                Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::EINTR)
            ),
            FaultError::AlreadyInstalled | FaultError::Install { .. } => false,
        }
    }
}
