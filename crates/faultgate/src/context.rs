//! The single process-wide context the signal handlers read.
//!
//! Signal handlers take no arguments from their installer, so everything a
//! handler needs lives here:
//!
//! - previous-handler slots: each written once during setup, read afterwards
//! - the shutdown gate, which also carries the startup-complete flag; the
//!   flag flips once at the end of startup, the gate opens at most once
//! - collaborators and build identity: fixed at construction
//!
//! No field needs a lock once setup is done.

use tracing::Level;

use crate::config::FaultConfig;
use crate::error::FaultError;
use crate::previous::PreviousHandler;
use crate::previous::SlotTable;
use crate::replication::NoopReplication;
use crate::replication::Replication;
use crate::shutdown::ShutdownGate;
use crate::signal::SignalKind;
use crate::sink::FaultSink;
use crate::sink::FdSink;

/// Component tag on every record this crate emits.
pub const COMPONENT: &str = "signal";

/// Build type and id stamped into fatal-signal messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildIdentity {
    pub build_type: &'static str,
    pub build_id: &'static str,
}

impl BuildIdentity {
    pub const fn new(build_type: &'static str, build_id: &'static str) -> Self {
        Self {
            build_type,
            build_id,
        }
    }

    /// Reads `FAULTGATE_BUILD_TYPE` and `FAULTGATE_BUILD_ID` at compile time.
    pub const fn from_build_env() -> Self {
        let build_type = match option_env!("FAULTGATE_BUILD_TYPE") {
            Some(value) => value,
            None => "community",
        };
        let build_id = match option_env!("FAULTGATE_BUILD_ID") {
            Some(value) => value,
            None => env!("CARGO_PKG_VERSION"),
        };
        Self::new(build_type, build_id)
    }
}

impl Default for BuildIdentity {
    fn default() -> Self {
        Self::from_build_env()
    }
}

pub struct SignalContext {
    pub(crate) slots: SlotTable,
    pub(crate) gate: ShutdownGate,
    pub(crate) sink: Box<dyn FaultSink>,
    pub(crate) replication: Box<dyn Replication>,
    pub(crate) build: BuildIdentity,
    pub(crate) config: FaultConfig,
}

impl SignalContext {
    pub fn builder() -> SignalContextBuilder {
        SignalContextBuilder::default()
    }

    pub fn gate(&self) -> &ShutdownGate {
        &self.gate
    }

    pub fn sink(&self) -> &dyn FaultSink {
        self.sink.as_ref()
    }

    pub fn build(&self) -> BuildIdentity {
        self.build
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    /// Called once by the startup sequence. Returns false if already set.
    pub fn mark_startup_complete(&self) -> bool {
        self.gate.mark_running()
    }

    pub fn is_startup_complete(&self) -> bool {
        self.gate.is_startup_complete()
    }

    /// The disposition recorded for `kind` at setup, if any.
    pub fn previous_handler(&self, kind: SignalKind) -> Option<PreviousHandler> {
        self.slots.get(kind)
    }

    pub(crate) fn record_previous(&self, kind: SignalKind, previous: PreviousHandler) {
        if !self.slots.record(kind, previous) {
            self.sink.log(
                Level::WARN,
                COMPONENT,
                format_args!("previous handler for {} already recorded", kind),
            );
        }
    }
}

#[derive(Default)]
pub struct SignalContextBuilder {
    sink: Option<Box<dyn FaultSink>>,
    replication: Option<Box<dyn Replication>>,
    build: Option<BuildIdentity>,
    config: Option<FaultConfig>,
}

impl SignalContextBuilder {
    pub fn with_sink(mut self, sink: impl FaultSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn with_replication(mut self, replication: impl Replication + 'static) -> Self {
        self.replication = Some(Box::new(replication));
        self
    }

    pub fn with_build_identity(mut self, build: BuildIdentity) -> Self {
        self.build = Some(build);
        self
    }

    pub fn with_config(mut self, config: FaultConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Without an explicit sink, opens `config.fault_log` or falls back to stderr.
    pub fn build(self) -> Result<SignalContext, FaultError> {
        let config = self.config.unwrap_or_default();
        let sink = match self.sink {
            Some(sink) => sink,
            None => match &config.fault_log {
                Some(path) => Box::new(FdSink::open(path)?),
                None => Box::new(FdSink::stderr()),
            },
        };

        Ok(SignalContext {
            slots: SlotTable::new(),
            gate: ShutdownGate::new().map_err(FaultError::Gate)?,
            sink,
            replication: self
                .replication
                .unwrap_or_else(|| Box::new(NoopReplication)),
            build: self.build.unwrap_or_default(),
            config,
        })
    }
}
