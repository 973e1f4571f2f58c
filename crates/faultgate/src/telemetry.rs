//! Ordinary-context logging for the host process. Signal handlers never log
//! through this unless the host picks [`TracingSink`](crate::TracingSink).

use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: quiet apart from warnings, with
/// setup events from this crate kept.
pub const DEFAULT_FILTER: &str = "warn,faultgate=info";

const LOG_FILE_ENV: &str = "FAULTGATE_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub default_filter: String,
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            log_file: None,
        }
    }
}

impl TelemetryConfig {
    /// Reads the log file from `FAULTGATE_LOG`. An empty value means stderr.
    pub fn from_env() -> Self {
        Self {
            log_file: log_file_from(std::env::var_os(LOG_FILE_ENV)),
            ..Self::default()
        }
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Keeps the background log writer alive. Dropping it flushes pending lines.
#[derive(Debug)]
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

/// Installs the global subscriber. A second call leaves the first in place.
pub fn init_tracing(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let (writer, guard) = match &config.log_file {
        Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                (BoxMakeWriter::new(non_blocking), Some(guard))
            }
            Err(err) => {
                eprintln!(
                    "Warning: failed to open {} {}: {}",
                    LOG_FILE_ENV,
                    path.display(),
                    err
                );
                (BoxMakeWriter::new(std::io::stderr), None)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    // Fault records name the thread that took the signal.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .with_ansi(config.log_file.is_none() && std::io::stderr().is_terminal())
        .with_writer(writer);

    match subscriber.try_init() {
        Ok(()) => TelemetryGuard { _guard: guard },
        Err(_) => TelemetryGuard { _guard: None },
    }
}

fn log_file_from(value: Option<OsString>) -> Option<PathBuf> {
    value.filter(|v| !v.is_empty()).map(PathBuf::from)
}
