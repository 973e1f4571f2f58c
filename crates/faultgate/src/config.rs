use std::env;
use std::path::PathBuf;

use crate::diagnostics::MAX_BACKTRACE_DEPTH;

const DEFAULT_BACKTRACE_DEPTH: usize = MAX_BACKTRACE_DEPTH;

#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Frames reported per crash, between 1 and [`MAX_BACKTRACE_DEPTH`].
    pub backtrace_depth: usize,
    /// Where the fault sink writes. `None` means stderr.
    pub fault_log: Option<PathBuf>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl FaultConfig {
    pub fn from_env() -> Self {
        Self {
            backtrace_depth: clamp_depth(
                env::var("FAULTGATE_BACKTRACE_DEPTH")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_BACKTRACE_DEPTH),
            ),
            fault_log: env::var_os("FAULTGATE_FAULT_LOG")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_backtrace_depth(mut self, depth: usize) -> Self {
        self.backtrace_depth = clamp_depth(depth);
        self
    }

    pub fn with_fault_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.fault_log = Some(path.into());
        self
    }

    pub fn with_stderr(mut self) -> Self {
        self.fault_log = None;
        self
    }
}

fn clamp_depth(depth: usize) -> usize {
    depth.clamp(1, MAX_BACKTRACE_DEPTH)
}
